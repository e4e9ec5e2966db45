use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One telemetry measurement as delivered by the ingestion front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub counter_name: String,
    pub volume: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resource_metadata: BTreeMap<String, serde_json::Value>,
}

const METADATA_PREFIX: &str = "metadata.";

impl Sample {
    pub fn new(counter_name: impl Into<String>, volume: f64, unit: impl Into<String>) -> Self {
        Self {
            counter_name: counter_name.into(),
            volume,
            unit: unit.into(),
            user_id: None,
            project_id: None,
            resource_id: None,
            source: None,
            timestamp: Utc::now(),
            resource_metadata: BTreeMap::new(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.resource_metadata.insert(key.into(), value.into());
        self
    }

    /// Resolves a matching key against this sample.
    ///
    /// Owner and resource identifiers always resolve to their own field.
    /// `metadata.<key>` reads resource metadata explicitly; any other bare
    /// key falls back to resource metadata. Non-string metadata values are
    /// rendered as canonical JSON text (`42`, `true`).
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "user_id" => self.user_id.clone(),
            "project_id" => self.project_id.clone(),
            "resource_id" => self.resource_id.clone(),
            "source" => self.source.clone(),
            _ => {
                let meta_key = key.strip_prefix(METADATA_PREFIX).unwrap_or(key);
                self.resource_metadata.get(meta_key).and_then(render_value)
            }
        }
    }
}

/// Text form used when comparing a JSON value against a matching
/// predicate. `null` has none.
pub fn render_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
