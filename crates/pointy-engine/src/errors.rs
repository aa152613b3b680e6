use pointy_core::{LockError, Message, StoreError};

/// Why a session operation did not complete.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Covers both unknown sessions and wrong credentials.
    #[error("permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OperationError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::PermissionDenied => "permission_denied",
            Self::Lock(e) => e.error_kind(),
            Self::Store(e) => e.error_kind(),
        }
    }

    /// Text safe to show the caller. Internal failures carry no detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(errors) => errors.join("; "),
            Self::PermissionDenied => "permission denied".to_string(),
            Self::Lock(_) | Self::Store(_) => "internal error".to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Lock(_) | Self::Store(_))
    }

    pub fn to_message(&self) -> Message {
        Message::ErrorEncountered(self.public_message())
    }
}
