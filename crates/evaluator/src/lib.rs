pub mod alarm;
pub mod api;
pub mod bucket;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod store;

pub use engine::{Evaluation, EvaluationEngine, StoredAlarm};
pub use error::EngineError;
