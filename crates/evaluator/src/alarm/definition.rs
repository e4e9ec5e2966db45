use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tripwire_common::render_value;

use super::operator::{ComparisonOperator, Statistic};
use super::state::AlarmState;

/// Expected value for one matching key: a single value or a set meaning
/// "any of these". JSON scalars are kept in the text form samples render
/// their metadata to, so `4` matches a metadata value of `4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MatchValue {
    One(String),
    Any(BTreeSet<String>),
}

fn predicate_scalar(value: &Value) -> Result<String, String> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(format!(
            "matching value must be a scalar or a list of scalars, got {value}"
        )),
        other => render_value(other).ok_or_else(|| "matching value must not be null".to_string()),
    }
}

impl TryFrom<Value> for MatchValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(predicate_scalar)
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Self::Any),
            other => predicate_scalar(&other).map(Self::One),
        }
    }
}

impl<'de> Deserialize<'de> for MatchValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl MatchValue {
    pub fn accepts(&self, actual: &str) -> bool {
        match self {
            Self::One(expected) => expected == actual,
            Self::Any(options) => options.contains(actual),
        }
    }
}

/// Raw, unvalidated alarm definition as supplied by the management side or
/// a seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlarmSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "yes")]
    pub enabled: bool,
    pub counter_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub matching_metadata: BTreeMap<String, MatchValue>,
    pub comparison_operator: String,
    pub threshold: f64,
    pub statistic: String,
    pub evaluation_period: u32,
    pub aggregate_period: u64,
    #[serde(default)]
    pub ok_actions: Vec<String>,
    #[serde(default)]
    pub alarm_actions: Vec<String>,
    #[serde(default)]
    pub insufficient_data_actions: Vec<String>,
    #[serde(default)]
    pub state: Option<AlarmState>,
    #[serde(default)]
    pub state_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Longest accepted aggregate period: ten years.
pub const MAX_AGGREGATE_PERIOD_SECS: u64 = 10 * 366 * 24 * 60 * 60;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    InvalidOperator { alarm: String, operator: String },
    UnknownStatistic { alarm: String, statistic: String },
    InvalidPeriod { alarm: String, field: &'static str },
    Malformed(String),
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOperator { alarm, operator } => {
                write!(f, "alarm '{alarm}': invalid comparison operator '{operator}'")
            }
            Self::UnknownStatistic { alarm, statistic } => {
                write!(f, "alarm '{alarm}': unknown statistic '{statistic}'")
            }
            Self::InvalidPeriod { alarm, field } => {
                write!(f, "alarm '{alarm}': {field} out of range")
            }
            Self::Malformed(msg) => write!(f, "malformed alarm definition: {msg}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub counter_name: String,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub matching_metadata: BTreeMap<String, MatchValue>,
    pub comparison_operator: ComparisonOperator,
    pub threshold: f64,
    pub statistic: Statistic,
    pub evaluation_period: u32,
    pub aggregate_period: u64,
    pub ok_actions: Vec<String>,
    pub alarm_actions: Vec<String>,
    pub insufficient_data_actions: Vec<String>,
    pub state: AlarmState,
    pub state_timestamp: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl AlarmDefinition {
    /// Validates a raw spec. A missing id is generated.
    pub fn from_spec(spec: AlarmSpec) -> Result<Self, ConfigurationError> {
        let comparison_operator = ComparisonOperator::parse(&spec.comparison_operator).ok_or_else(|| {
            ConfigurationError::InvalidOperator {
                alarm: spec.name.clone(),
                operator: spec.comparison_operator.clone(),
            }
        })?;
        let statistic = Statistic::parse(&spec.statistic).ok_or_else(|| {
            ConfigurationError::UnknownStatistic {
                alarm: spec.name.clone(),
                statistic: spec.statistic.clone(),
            }
        })?;
        if spec.evaluation_period == 0 {
            return Err(ConfigurationError::InvalidPeriod {
                alarm: spec.name,
                field: "evaluation_period",
            });
        }
        if spec.aggregate_period == 0 || spec.aggregate_period > MAX_AGGREGATE_PERIOD_SECS {
            return Err(ConfigurationError::InvalidPeriod {
                alarm: spec.name,
                field: "aggregate_period",
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: spec.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: spec.name,
            description: spec.description,
            enabled: spec.enabled,
            counter_name: spec.counter_name,
            user_id: spec.user_id,
            project_id: spec.project_id,
            matching_metadata: spec.matching_metadata,
            comparison_operator,
            threshold: spec.threshold,
            statistic,
            evaluation_period: spec.evaluation_period,
            aggregate_period: spec.aggregate_period,
            ok_actions: spec.ok_actions,
            alarm_actions: spec.alarm_actions,
            insufficient_data_actions: spec.insufficient_data_actions,
            state: spec.state.unwrap_or_default(),
            state_timestamp: spec.state_timestamp.unwrap_or(now),
            timestamp: spec.timestamp.unwrap_or(now),
        })
    }

    /// Parses and validates a JSON value in one step.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigurationError> {
        let spec: AlarmSpec =
            serde_json::from_value(value).map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        Self::from_spec(spec)
    }

    pub fn aggregate_duration(&self) -> Duration {
        let secs = self.aggregate_period.min(MAX_AGGREGATE_PERIOD_SECS);
        Duration::seconds(secs as i64)
    }

    pub fn actions_for(&self, state: AlarmState) -> &[String] {
        match state {
            AlarmState::Ok => &self.ok_actions,
            AlarmState::Alarm => &self.alarm_actions,
            AlarmState::InsufficientData => &self.insufficient_data_actions,
        }
    }

    /// Copy of this definition moved to `state`, or `None` if already there.
    pub fn transitioned(&self, state: AlarmState, at: DateTime<Utc>) -> Option<Self> {
        if self.state == state {
            return None;
        }
        let mut next = self.clone();
        next.state = state;
        next.state_timestamp = at;
        Some(next)
    }

    /// Public fields exposed to actions, in a fixed allow-list.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        BTreeMap::from([
            ("id", self.id.clone()),
            ("name", self.name.clone()),
            ("description", opt(&self.description)),
            ("enabled", self.enabled.to_string()),
            ("counter_name", self.counter_name.clone()),
            ("user_id", opt(&self.user_id)),
            ("project_id", opt(&self.project_id)),
            ("comparison_operator", self.comparison_operator.to_string()),
            ("threshold", self.threshold.to_string()),
            ("statistic", self.statistic.to_string()),
            ("evaluation_period", self.evaluation_period.to_string()),
            ("aggregate_period", self.aggregate_period.to_string()),
            ("state", self.state.to_string()),
            ("state_timestamp", self.state_timestamp.to_rfc3339()),
            ("timestamp", self.timestamp.to_rfc3339()),
        ])
    }
}
