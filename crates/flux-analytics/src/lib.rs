pub mod bottleneck;
pub mod error;
pub mod isolation;
pub mod model;
pub mod regression;
pub mod stats;
pub mod trend;

pub use bottleneck::{
    BottleneckAnalysis, BottleneckAnalyzer, BottleneckType, ComponentMetrics, PerformanceTrend,
    SystemBottleneckReport,
};
pub use error::{AnalyticsError, Result};
pub use isolation::IsolationForest;
pub use model::Severity;
pub use regression::{RegressionDetector, RegressionResult, RegressionType};
pub use stats::LinearFit;
pub use trend::{TrendAnalysis, TrendAnalyzer, TrendDirection};
