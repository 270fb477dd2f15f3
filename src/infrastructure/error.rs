use crate::domain::lifecycle::TransitionError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote document not found: {0}")]
    NotFound(String),
    #[error("remote store rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("remote revision conflict: {0}")]
    Conflict(String),
    #[error("remote store unreachable: {0}")]
    Network(String),
    #[error("remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("remote store is not configured: {0}")]
    NotConfigured(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Drawing recognition failed: {0}")]
    Recognition(String),
    #[error("a sync is already in progress")]
    SyncInProgress,
    #[error("sync failed: {0}")]
    SyncFailed(Box<InfraError>),
}

impl InfraError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Json(_) | Self::Sqlite(_))
    }

    pub fn sync_failed(cause: InfraError) -> Self {
        match cause {
            Self::SyncFailed(_) | Self::SyncInProgress => cause,
            other => Self::SyncFailed(Box::new(other)),
        }
    }

    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(error) => Some(error),
            Self::SyncFailed(inner) => inner.remote(),
            _ => None,
        }
    }
}
