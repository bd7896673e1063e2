use crate::error::PlaybackError;
use async_trait::async_trait;
use common::playback::ProtocolEndpoints;

/// Resolves a stream id to its per-protocol connection URLs.
///
/// A missing protocol entry means "unavailable", not an error. The backend
/// admission point may reject the request outright with
/// [`PlaybackError::CapacityExceeded`] carrying its authoritative limit;
/// the caller reconciles the local pool capacity to that number.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, stream_id: &str) -> Result<ProtocolEndpoints, PlaybackError>;
}
