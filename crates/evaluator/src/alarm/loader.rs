use std::path::Path;

use super::definition::{AlarmDefinition, AlarmSpec};

#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for LoadError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

/// Reads a list of alarm definitions (YAML or JSON) from `path`.
pub fn load_definitions(path: &Path) -> Result<Vec<AlarmDefinition>, LoadError> {
    let contents = std::fs::read_to_string(path)?;
    parse_definitions(&contents)
}

/// Parses a document holding a list of definitions. Entries that fail
/// validation are skipped with a warning; the rest are returned. Entries
/// without an id are keyed by their name so reloads stay stable.
pub fn parse_definitions(contents: &str) -> Result<Vec<AlarmDefinition>, LoadError> {
    let entries: Vec<serde_yaml::Value> = serde_yaml::from_str(contents)?;
    let mut definitions = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let mut spec: AlarmSpec = match serde_yaml::from_value(entry) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed alarm definition");
                continue;
            }
        };
        if spec.id.is_none() {
            spec.id = Some(spec.name.clone());
        }
        match AlarmDefinition::from_spec(spec) {
            Ok(def) => definitions.push(def),
            Err(e) => tracing::warn!(index, error = %e, "skipping invalid alarm definition"),
        }
    }

    Ok(definitions)
}
