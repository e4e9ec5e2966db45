use std::collections::BTreeMap;

use async_trait::async_trait;

/// Public alarm fields handed to an action.
pub type ActionFields = BTreeMap<&'static str, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// POST to a URL that may contain `{field}` placeholders.
    Webhook(String),
    /// Shell command line run through `sh -c`.
    Command(String),
}

impl Action {
    /// `None` for blank entries.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Some(Self::Webhook(raw.to_string()))
        } else {
            Some(Self::Command(raw.to_string()))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Command(_) => "command",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Webhook(t) | Self::Command(t) => t,
        }
    }
}

#[derive(Debug)]
pub enum ActionError {
    Http(String),
    Launch(std::io::Error),
    Exit(Option<i32>),
    TimedOut(std::time::Duration),
    Signing(String),
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "webhook: {e}"),
            Self::Launch(e) => write!(f, "launch: {e}"),
            Self::Exit(Some(code)) => write!(f, "exited with status {code}"),
            Self::Exit(None) => write!(f, "terminated by signal"),
            Self::TimedOut(after) => write!(f, "killed after {}s", after.as_secs_f64()),
            Self::Signing(e) => write!(f, "signing: {e}"),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<reqwest::Error> for ActionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        Self::Launch(e)
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action, fields: &ActionFields) -> Result<(), ActionError>;
}
