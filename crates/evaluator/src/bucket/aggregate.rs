use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::Statistic;

/// Statistical summary of the samples one alarm received during one
/// aggregate period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    /// Assigned by the bucket store; `None` until persisted.
    pub id: Option<i64>,
    pub alarm_id: String,
    pub unit: String,
    pub start: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub avg: f64,
    pub sample_count: u64,
}

impl AggregateBucket {
    pub fn open(alarm_id: &str, start: DateTime<Utc>, value: f64, unit: &str) -> Self {
        Self {
            id: None,
            alarm_id: alarm_id.to_string(),
            unit: unit.to_string(),
            start,
            min: value,
            max: value,
            sum: value,
            avg: value,
            sample_count: 1,
        }
    }

    /// Adds one value. Returns `false` when `unit` differs from the bucket's
    /// unit; the value is folded in regardless and the first unit kept.
    pub fn fold(&mut self, value: f64, unit: &str) -> bool {
        if self.sample_count == 0 {
            self.unit = unit.to_string();
            self.min = value;
            self.max = value;
            self.sum = value;
            self.avg = value;
            self.sample_count = 1;
            return true;
        }
        self.sample_count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.avg = self.sum / self.sample_count as f64;
        self.unit == unit
    }

    pub fn statistic(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Min => self.min,
            Statistic::Max => self.max,
            Statistic::Avg => self.avg,
            Statistic::Sum => self.sum,
            Statistic::Count => self.sample_count as f64,
        }
    }

    /// Still accepting samples at `now`. A period reaching back past the
    /// representable range keeps the bucket open.
    pub fn is_open(&self, now: DateTime<Utc>, aggregate_period: Duration) -> bool {
        now.checked_sub_signed(aggregate_period)
            .is_none_or(|cutoff| self.start > cutoff)
    }
}
