mod engine_metrics;
mod exposition;

pub use engine_metrics::EngineMetrics;
pub use exposition::render_prometheus;
