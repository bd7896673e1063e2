use anyhow::Result;
use async_trait::async_trait;
use common::health::HealthSample;
use common::playback::StreamProtocol;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Raw events reported by the underlying media pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Manifest/initialization data parsed; the stream is decodable
    ManifestParsed,
    /// First decodable frame available (native `loadeddata` analog)
    LoadedData,
    /// Pipeline error; non-fatal errors are recovered locally
    Error { fatal: bool, message: String },
}

/// Handle onto an external media element. The core never decodes media
/// itself; it drives load/play/pause and observes readiness through this
/// seam. Implementations must be cheap to clone behind an `Arc`.
#[async_trait]
pub trait MediaHandle: Send + Sync {
    /// Point the element at a new source URL (also used for reloads)
    async fn load(&self, url: &str, protocol: StreamProtocol) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    /// Protocol-specific recovery primitive for non-fatal pipeline errors
    /// (e.g. a media-codec recover or a segment re-fetch)
    async fn recover(&self) -> Result<()>;
    /// Most recent health observation; never blocks
    fn sample(&self) -> HealthSample;
    /// Subscribe to pipeline events
    fn events(&self) -> broadcast::Receiver<PipelineEvent>;
}

/// Factory for media handles, one per playback session.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open(&self, stream_id: &str) -> Result<Arc<dyn MediaHandle>>;
}
