mod aggregate;
mod lifecycle;

pub use aggregate::AggregateBucket;
pub use lifecycle::{IngestOutcome, ingest, prune};
