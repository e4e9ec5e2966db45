#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    NotFound { kind: &'static str, id: String },
    Duplicate { kind: &'static str, id: String },
    Unavailable(String),
    Backend(String),
}

impl StoreError {
    pub fn alarm_not_found(id: &str) -> Self {
        Self::NotFound { kind: "alarm", id: id.to_string() }
    }

    pub fn bucket_not_found(id: i64) -> Self {
        Self::NotFound { kind: "bucket", id: id.to_string() }
    }

    /// Worth retrying: the backend could not be reached or timed out.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} {id} not found"),
            Self::Duplicate { kind, id } => write!(f, "{kind} {id} already exists"),
            Self::Unavailable(e) => write!(f, "store unavailable: {e}"),
            Self::Backend(e) => write!(f, "store: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(e.to_string()),
            sqlx::Error::Database(ref db) if is_transient_sqlstate(db.code().as_deref()) => {
                Self::Unavailable(e.to_string())
            }
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Backend(format!("serialization: {e}"))
    }
}

/// Connection failures, serialization conflicts, deadlocks and
/// "too many clients".
fn is_transient_sqlstate(code: Option<&str>) -> bool {
    match code {
        Some(code) => code.starts_with("08") || matches!(code, "40001" | "40P01" | "53300" | "57P03"),
        None => false,
    }
}
