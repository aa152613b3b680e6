use std::time::Duration;

/// Failures talking to the durable store.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: String,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Conflict(_) => "conflict",
            Self::Serialization(_) => "serialization",
            Self::CorruptRow { .. } => "corrupt_row",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out acquiring lock {key} after {attempts} attempts ({waited:?})")]
    Timeout {
        key: String,
        attempts: u32,
        waited: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "lock_timeout",
            Self::Store(e) => e.error_kind(),
        }
    }
}

/// Delivery failures other than the target connection being gone.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PushError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The connection isn't held here. It may be live on another process.
    #[error("connection {0} is not held by this process")]
    NotLocal(String),

    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl PushError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Status { .. } => "status",
            Self::Transport(_) => "transport",
            Self::NotLocal(_) => "not_local",
            Self::Encode(_) => "encode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_into_lock_error() {
        let err: LockError = StoreError::Database("disk full".into()).into();
        assert!(matches!(err, LockError::Store(StoreError::Database(_))));
        assert_eq!(err.error_kind(), "database");
        assert_eq!(err.to_string(), "database error: disk full");
    }

    #[test]
    fn timeout_display_names_key() {
        let err = LockError::Timeout {
            key: "session-lock:S1".into(),
            attempts: 3,
            waited: Duration::from_millis(15),
        };
        assert!(err.to_string().contains("session-lock:S1"));
        assert_eq!(err.error_kind(), "lock_timeout");
    }

    #[test]
    fn push_error_kinds() {
        assert_eq!(PushError::Timeout(Duration::from_secs(1)).error_kind(), "timeout");
        assert_eq!(
            PushError::Status { status: 500, body: String::new() }.error_kind(),
            "status"
        );
        assert_eq!(PushError::Transport("reset".into()).error_kind(), "transport");
        assert_eq!(PushError::NotLocal("conn_x".into()).error_kind(), "not_local");
    }

    #[test]
    fn json_errors_become_serialization_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: StoreError = json_err.into();
        assert_eq!(err.error_kind(), "serialization");
    }
}
