use thiserror::Error;

/// 分析错误
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// 样本不足
    #[error("Insufficient data: required {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// 输入无效
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

impl AnalyticsError {
    pub fn insufficient(required: usize, actual: usize) -> Self {
        AnalyticsError::InsufficientData { required, actual }
    }
}
