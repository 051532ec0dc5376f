pub mod engine;
pub mod error;
pub mod loader;
pub mod rule;

pub use engine::{
    AlertingConfig, BottleneckConfig, EngineConfig, LogFormat, LoggingConfig, RegressionConfig,
    StoreConfig, TrendConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use rule::RuleConfig;
