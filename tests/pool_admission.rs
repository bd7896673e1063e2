use anyhow::Result;
use async_trait::async_trait;
use common::health::{HealthSample, ReadyLevel};
use common::playback::{ProtocolEndpoints, StreamProtocol};
use playback_core::{
    EndpointResolver, MediaBackend, MediaHandle, MetricsSink, PipelineEvent, PlaybackError,
    PlaybackManager, RecoveryPolicy, SessionHooks,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

fn test_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        connect_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_secs(5),
        stall_confirm_window: Duration::from_secs(5),
        reload_confirm_timeout: Duration::from_secs(3),
        max_reloads: 3,
        reload_window: Duration::from_secs(60),
        repromote_delay: Duration::from_secs(60),
        non_fatal_error_budget: 3,
    }
}

/// Media fake that is always instantly healthy on any protocol.
struct InstantMedia {
    events_tx: broadcast::Sender<PipelineEvent>,
}

#[async_trait]
impl MediaHandle for InstantMedia {
    async fn load(&self, _url: &str, _protocol: StreamProtocol) -> Result<()> {
        let _ = self.events_tx.send(PipelineEvent::ManifestParsed);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn recover(&self) -> Result<()> {
        Ok(())
    }

    fn sample(&self) -> HealthSample {
        HealthSample {
            buffered_ahead_secs: 4.0,
            ready_level: ReadyLevel::EnoughData,
            paused: false,
        }
    }

    fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }
}

struct InstantBackend;

#[async_trait]
impl MediaBackend for InstantBackend {
    async fn open(&self, _stream_id: &str) -> Result<Arc<dyn MediaHandle>> {
        let (events_tx, _) = broadcast::channel(64);
        Ok(Arc::new(InstantMedia { events_tx }))
    }
}

/// Resolver that can be armed to answer the next resolve with a structured
/// capacity rejection, the way the media edge rejects over-subscription.
struct StubResolver {
    limit_signal: Mutex<Option<usize>>,
}

impl StubResolver {
    fn new() -> Arc<Self> {
        Arc::new(Self { limit_signal: Mutex::new(None) })
    }

    fn arm_limit(&self, limit: usize) {
        *self.limit_signal.lock().unwrap() = Some(limit);
    }
}

#[async_trait]
impl EndpointResolver for StubResolver {
    async fn resolve(&self, stream_id: &str) -> Result<ProtocolEndpoints, PlaybackError> {
        if let Some(limit) = self.limit_signal.lock().unwrap().take() {
            return Err(PlaybackError::CapacityExceeded { limit });
        }
        Ok(ProtocolEndpoints {
            hls: Some(format!("http://edge/{stream_id}/index.m3u8")),
            ..ProtocolEndpoints::default()
        })
    }
}

struct NullSink;

impl MetricsSink for NullSink {
    fn record_protocol_fallback(&self, _id: &str, _from: StreamProtocol, _to: StreamProtocol) {}
}

fn manager(capacity: usize, resolver: Arc<StubResolver>) -> PlaybackManager {
    PlaybackManager::new(
        capacity,
        resolver,
        Arc::new(InstantBackend),
        Arc::new(NullSink),
        test_policy(),
    )
}

#[tokio::test(start_paused = true)]
async fn admissions_stop_at_capacity_and_cite_the_limit() {
    let manager = manager(2, StubResolver::new());

    manager.start("cam-1", SessionHooks::default()).await.unwrap();
    manager.start("cam-2", SessionHooks::default()).await.unwrap();

    let err = manager
        .start("cam-3", SessionHooks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::CapacityExceeded { limit: 2 }));
    assert!(err.to_string().contains('2'), "{err}");

    let status = manager.pool_status();
    assert_eq!(status.capacity, 2);
    assert_eq!(status.active, 2);
    assert!(manager.get("cam-3").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn stopping_a_session_frees_its_slot() {
    let manager = manager(2, StubResolver::new());

    manager.start("cam-1", SessionHooks::default()).await.unwrap();
    manager.start("cam-2", SessionHooks::default()).await.unwrap();
    assert!(manager.stop("cam-1").await.unwrap());

    manager.start("cam-3", SessionHooks::default()).await.unwrap();
    let status = manager.pool_status();
    assert_eq!(status.active, 2);
}

#[tokio::test(start_paused = true)]
async fn backend_capacity_signal_reconciles_the_local_pool() {
    let resolver = StubResolver::new();
    let manager = manager(4, resolver.clone());

    manager.start("cam-1", SessionHooks::default()).await.unwrap();
    manager.start("cam-2", SessionHooks::default()).await.unwrap();

    // the media edge says the real limit is 2, not 4
    resolver.arm_limit(2);
    let err = manager
        .start("cam-3", SessionHooks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::CapacityExceeded { limit: 2 }));
    assert_eq!(manager.pool_status().capacity, 2);

    // the reconciled pool now rejects locally, before touching the backend
    let err = manager
        .start("cam-4", SessionHooks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::CapacityExceeded { limit: 2 }));
    assert_eq!(manager.pool_status().active, 2);
}

#[tokio::test(start_paused = true)]
async fn shrinking_capacity_never_evicts_live_sessions() {
    let manager = manager(3, StubResolver::new());

    for id in ["cam-1", "cam-2", "cam-3"] {
        manager.start(id, SessionHooks::default()).await.unwrap();
    }
    manager.set_capacity(1);

    // existing sessions keep playing over the new bound
    assert_eq!(manager.list().await.len(), 3);
    let status = manager.pool_status();
    assert_eq!(status.capacity, 1);
    assert_eq!(status.active, 3);

    let err = manager
        .start("cam-4", SessionHooks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::CapacityExceeded { limit: 1 }));

    // slots only come back through attrition
    manager.stop("cam-1").await.unwrap();
    manager.stop("cam-2").await.unwrap();
    let err = manager
        .start("cam-5", SessionHooks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybackError::CapacityExceeded { limit: 1 }));
    manager.stop("cam-3").await.unwrap();
    manager.start("cam-5", SessionHooks::default()).await.unwrap();
}
