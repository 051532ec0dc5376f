pub mod engine;
pub mod error;
pub mod source;
pub mod supervisor;

pub use engine::{EngineStatus, PerfEngine};
pub use error::{PerfError, Result};
pub use source::MetricSource;
pub use supervisor::TaskSupervisor;
