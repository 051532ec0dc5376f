pub mod model;
pub mod ring;
pub mod store;

pub use model::{MetricSample, MetricSummary};
pub use ring::RingBuffer;
pub use store::MetricStore;
