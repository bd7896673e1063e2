//! Playback session manager: admission control plus session lifecycle.

use crate::error::PlaybackError;
use crate::media::MediaBackend;
use crate::metrics;
use crate::policy::RecoveryPolicy;
use crate::pool::StreamPool;
use crate::resolver::EndpointResolver;
use crate::session::{Session, SessionHooks};
use crate::sink::MetricsSink;
use common::playback::{PoolStatus, SessionSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Owns every live playback session and the decode-slot pool. Constructed
/// once and shared by reference; all collaborators are injected.
pub struct PlaybackManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    pool: StreamPool,
    resolver: Arc<dyn EndpointResolver>,
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn MetricsSink>,
    policy: RecoveryPolicy,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Clone for PlaybackManager {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl PlaybackManager {
    pub fn new(
        capacity: usize,
        resolver: Arc<dyn EndpointResolver>,
        backend: Arc<dyn MediaBackend>,
        sink: Arc<dyn MetricsSink>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                pool: StreamPool::new(capacity),
                resolver,
                backend,
                sink,
                policy,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Start playback of a stream: admit it into the pool, resolve its
    /// endpoints, open a media handle, and spawn the session driver.
    /// A structured capacity rejection from the backend is reconciled
    /// into the local pool before being surfaced.
    pub async fn start(
        &self,
        stream_id: &str,
        hooks: SessionHooks,
    ) -> Result<SessionSnapshot, PlaybackError> {
        if self.inner.sessions.read().await.contains_key(stream_id) {
            return Err(PlaybackError::SessionExists(stream_id.to_string()));
        }

        // The slot doubles as a reservation for the id: a concurrent start
        // for the same stream fails here instead of racing the insert
        // below, and the sessions lock is never held across an await.
        if let Err(err) = self.inner.pool.request_slot(stream_id) {
            if matches!(err, PlaybackError::CapacityExceeded { .. }) {
                metrics::POOL_REJECTIONS_TOTAL.inc();
            }
            return Err(err);
        }

        let endpoints = match self.inner.resolver.resolve(stream_id).await {
            Ok(endpoints) => endpoints,
            Err(PlaybackError::CapacityExceeded { limit }) => {
                // the backend enforcement point knows better than we do
                self.inner.pool.release_slot(stream_id);
                self.inner.pool.set_capacity(limit);
                metrics::POOL_REJECTIONS_TOTAL.inc();
                warn!(stream = %stream_id, limit, "backend capacity signal, pool reconciled");
                return Err(PlaybackError::CapacityExceeded { limit });
            }
            Err(err) => {
                self.inner.pool.release_slot(stream_id);
                return Err(err);
            }
        };

        if endpoints.is_empty() {
            self.inner.pool.release_slot(stream_id);
            return Err(PlaybackError::NoUsableEndpoint(stream_id.to_string()));
        }

        let media = match self.inner.backend.open(stream_id).await {
            Ok(media) => media,
            Err(err) => {
                self.inner.pool.release_slot(stream_id);
                return Err(PlaybackError::media(err));
            }
        };

        let session = Session::new(
            stream_id.to_string(),
            endpoints,
            media,
            self.inner.sink.clone(),
            self.inner.policy.clone(),
            hooks,
        );
        self.inner
            .sessions
            .write()
            .await
            .insert(stream_id.to_string(), session.clone());
        metrics::SESSIONS_ACTIVE.inc();

        info!(stream = %stream_id, "playback session started");
        session.begin().await;
        Ok(session.snapshot().await)
    }

    /// Stop a session: cancel all of its timers and waits, release its
    /// decode slot, and forget it. Returns false if it did not exist.
    pub async fn stop(&self, stream_id: &str) -> Result<bool, PlaybackError> {
        let removed = self.inner.sessions.write().await.remove(stream_id);
        match removed {
            Some(session) => {
                session.shutdown();
                self.inner.pool.release_slot(stream_id);
                metrics::SESSIONS_ACTIVE.dec();
                info!(stream = %stream_id, "playback session stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Manual retry of a failed session.
    pub async fn retry(&self, stream_id: &str) -> Result<SessionSnapshot, PlaybackError> {
        let session = self
            .inner
            .sessions
            .read()
            .await
            .get(stream_id)
            .cloned()
            .ok_or_else(|| PlaybackError::SessionNotFound(stream_id.to_string()))?;
        session.retry().await?;
        Ok(session.snapshot().await)
    }

    pub async fn get(&self, stream_id: &str) -> Option<SessionSnapshot> {
        let session = self.inner.sessions.read().await.get(stream_id).cloned()?;
        Some(session.snapshot().await)
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> =
            self.inner.sessions.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot().await);
        }
        snapshots
    }

    /// Soft-resize the pool; only enforced on subsequent admissions.
    pub fn set_capacity(&self, capacity: usize) {
        self.inner.pool.set_capacity(capacity);
    }

    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.inner.pool.capacity(),
            active: self.inner.pool.active(),
        }
    }
}
