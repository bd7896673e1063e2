use common::playback::SessionState;
use thiserror::Error;

/// Errors surfaced across the playback core's public boundary.
/// Everything recoverable is resolved internally; these are the
/// terminal or caller-visible conditions only.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("stream limit exceeded: at most {limit} concurrent streams allowed")]
    CapacityExceeded { limit: usize },

    #[error("no usable endpoint for stream '{0}'")]
    NoUsableEndpoint(String),

    #[error("session '{0}' already exists")]
    SessionExists(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("session '{id}' cannot be retried from state '{state:?}'")]
    NotRetryable { id: String, state: SessionState },

    #[error("media pipeline error: {0}")]
    Media(String),

    #[error("endpoint resolution failed: {0}")]
    Resolver(String),
}

impl PlaybackError {
    pub fn media(err: impl std::fmt::Display) -> Self {
        Self::Media(err.to_string())
    }

    pub fn resolver(err: impl std::fmt::Display) -> Self {
        Self::Resolver(err.to_string())
    }
}
