use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tripwire_common::RetryConfig;

use crate::alarm::WindowPolicy;

pub const CONFIG_ENV: &str = "TRIPWIRE_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EvaluatorConfig {
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    /// Postgres URL; the in-memory store is used when unset.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Seed definitions (YAML or JSON list) added to the store at startup.
    #[serde(default)]
    pub alarms_file: Option<PathBuf>,
    #[serde(default)]
    pub window_policy: WindowPolicy,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Also bounds how long a command action may run.
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub store_retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub store_retry_delay_ms: u64,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
}

fn default_api_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    100
}

fn default_max_connections() -> u32 {
    10
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            api_addr: default_api_addr(),
            database_url: None,
            alarms_file: None,
            window_policy: WindowPolicy::default(),
            webhook_secret: None,
            webhook_timeout_secs: default_webhook_timeout(),
            store_retry_attempts: default_retry_attempts(),
            store_retry_delay_ms: default_retry_delay(),
            db_max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

impl EvaluatorConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// File named by `TRIPWIRE_CONFIG` (defaults otherwise), then
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = match lookup(CONFIG_ENV) {
            Some(path) => Self::load_from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(addr) = lookup("TRIPWIRE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(path) = lookup("TRIPWIRE_ALARMS_FILE") {
            self.alarms_file = Some(PathBuf::from(path));
        }
        if let Some(policy) = lookup("TRIPWIRE_WINDOW_POLICY") {
            self.window_policy = WindowPolicy::parse(&policy).ok_or_else(|| {
                ConfigError::Validation(format!("unknown window policy '{policy}'"))
            })?;
        }
        if let Some(secret) = lookup("TRIPWIRE_WEBHOOK_SECRET") {
            self.webhook_secret = Some(secret);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_addr.trim().is_empty() {
            return Err(ConfigError::Validation("api_addr must not be empty".into()));
        }
        if self.webhook_timeout_secs == 0 {
            return Err(ConfigError::Validation("webhook_timeout_secs must be > 0".into()));
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Validation("db_max_connections must be > 0".into()));
        }
        if self.database_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(ConfigError::Validation("database_url must not be empty".into()));
        }
        Ok(())
    }

    pub fn store_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.store_retry_attempts.max(1),
            initial_delay: Duration::from_millis(self.store_retry_delay_ms),
            backoff_factor: 2.0,
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}
