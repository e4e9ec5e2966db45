pub mod retry;
pub mod sample;

pub use retry::{RetryConfig, retry_async};
pub use sample::{Sample, render_value};
