use serde::{Deserialize, Serialize};

use super::definition::AlarmDefinition;
use crate::bucket::AggregateBucket;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmState {
    #[default]
    #[serde(rename = "insufficient data", alias = "insufficient_data")]
    InsufficientData,
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "alarm")]
    Alarm,
}

impl AlarmState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insufficient data" | "insufficient_data" => Some(Self::InsufficientData),
            "ok" => Some(Self::Ok),
            "alarm" => Some(Self::Alarm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient data",
            Self::Ok => "ok",
            Self::Alarm => "alarm",
        }
    }
}

impl std::fmt::Display for AlarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a full evaluation window decides between OK and ALARM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// ALARM as soon as one bucket in the window breaches the threshold.
    #[default]
    AnyBreach,
    /// ALARM only while every bucket in the window breaches the threshold.
    AllBreach,
    /// The comparison describes the healthy condition: OK only while it
    /// holds for every bucket in the window, ALARM otherwise.
    AllMustSatisfy,
}

impl WindowPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "any_breach" | "any" => Some(Self::AnyBreach),
            "all_breach" | "all" => Some(Self::AllBreach),
            "all_must_satisfy" => Some(Self::AllMustSatisfy),
            _ => None,
        }
    }
}

/// Computes the state the alarm should be in for `buckets` (newest first).
///
/// Only the `evaluation_period` newest buckets are considered; fewer than
/// that yields `InsufficientData`.
pub fn evaluate_window(
    definition: &AlarmDefinition,
    buckets: &[AggregateBucket],
    policy: WindowPolicy,
) -> AlarmState {
    let period = definition.evaluation_period as usize;
    if period == 0 || buckets.len() < period {
        return AlarmState::InsufficientData;
    }

    let breaches = |bucket: &AggregateBucket| {
        definition
            .comparison_operator
            .evaluate(bucket.statistic(definition.statistic), definition.threshold)
    };

    let window = &buckets[..period];
    let alarming = match policy {
        WindowPolicy::AnyBreach => window.iter().any(breaches),
        WindowPolicy::AllBreach => window.iter().all(breaches),
        WindowPolicy::AllMustSatisfy => !window.iter().all(breaches),
    };

    if alarming {
        AlarmState::Alarm
    } else {
        AlarmState::Ok
    }
}
