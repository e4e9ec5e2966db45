use chrono::{DateTime, Duration, Utc};
use tripwire_common::Sample;

use super::aggregate::AggregateBucket;

/// Result of folding one sample into an alarm's buckets. The bucket is a
/// detached copy; callers persist it before publishing it anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Created(AggregateBucket),
    Updated(AggregateBucket),
}

impl IngestOutcome {
    pub fn bucket(&self) -> &AggregateBucket {
        match self {
            Self::Created(b) | Self::Updated(b) => b,
        }
    }
}

/// Folds `sample` into the newest of `buckets` (newest first), or opens a
/// new bucket starting at `now` when there is none or the newest one is at
/// least `aggregate_period` old.
pub fn ingest(
    alarm_id: &str,
    sample: &Sample,
    buckets: &[AggregateBucket],
    now: DateTime<Utc>,
    aggregate_period: Duration,
) -> IngestOutcome {
    match buckets.first() {
        Some(newest) if newest.is_open(now, aggregate_period) => {
            let mut bucket = newest.clone();
            if !bucket.fold(sample.volume, &sample.unit) {
                tracing::warn!(
                    alarm_id,
                    bucket_unit = %bucket.unit,
                    sample_unit = %sample.unit,
                    "sample unit differs from bucket unit, keeping bucket unit"
                );
            }
            IngestOutcome::Updated(bucket)
        }
        _ => IngestOutcome::Created(AggregateBucket::open(alarm_id, now, sample.volume, &sample.unit)),
    }
}

/// Buckets past the newest `keep` (newest first); these are due for deletion.
pub fn prune(buckets: &[AggregateBucket], keep: usize) -> &[AggregateBucket] {
    buckets.get(keep..).unwrap_or(&[])
}
