//! Metric samples reported by agents
//!
//! Agents push samples over HTTP; the store keeps a bounded window of them
//! in memory so the threshold checker can aggregate fresh values.

pub mod retention;
pub mod store;

pub use retention::RetentionWorker;
pub use store::{MetricError, MetricSample, MetricStore};
