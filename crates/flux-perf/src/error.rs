use flux_alert::AlertError;
use flux_config::ConfigError;
use thiserror::Error;

/// 引擎错误
#[derive(Debug, Error)]
pub enum PerfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Engine is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, PerfError>;
