mod alarms;
mod health;
mod metrics;
mod samples;
mod server;

pub use server::{ApiState, router, serve};
