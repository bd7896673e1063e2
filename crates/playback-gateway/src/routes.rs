use crate::error::ApiError;
use crate::state::AppState;
use axum::{
  extract::{Path, State},
  routing::{delete, get, post, put},
  Json, Router,
};
use common::playback::{
  CapacityUpdateRequest, PlaybackListResponse, PlaybackStartRequest, PlaybackStartResponse,
  PlaybackStopResponse, PoolStatus, SessionSnapshot,
};
use playback_core::{metrics, SessionHooks};
use std::sync::Arc;
use tracing::{error, info, warn};

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/healthz", get(healthz))
    .route("/v1/playback", post(start_playback))
    .route("/v1/playback", get(list_playback))
    .route("/v1/playback/:id", get(get_playback))
    .route("/v1/playback/:id", delete(stop_playback))
    .route("/v1/playback/:id/retry", post(retry_playback))
    .route("/v1/pool", get(pool_status))
    .route("/v1/pool/capacity", put(set_capacity))
    .route("/metrics", get(|| async { metrics::render() }))
    .with_state(state)
}

async fn healthz() -> &'static str {
  "ok"
}

/// Hooks that surface session events into the gateway's logs. A richer
/// presentation layer would subscribe here instead.
fn log_hooks() -> SessionHooks {
  SessionHooks {
    on_stalled: Some(Arc::new(|id: &str| {
      warn!(session = %id, "playback stalled");
    })),
    on_recovery: Some(Arc::new(|id: &str| {
      info!(session = %id, "playback recovered");
    })),
    on_protocol_switch: Some(Arc::new(|id: &str, from, to| {
      info!(session = %id, ?from, %to, "protocol switch");
    })),
    on_error: Some(Arc::new(|id: &str, message: &str| {
      error!(session = %id, %message, "playback failed");
    })),
  }
}

async fn start_playback(
  State(state): State<AppState>,
  Json(req): Json<PlaybackStartRequest>,
) -> Result<Json<PlaybackStartResponse>, ApiError> {
  let snapshot = state.manager().start(&req.stream_id, log_hooks()).await?;
  Ok(Json(PlaybackStartResponse {
    accepted: true,
    session: Some(snapshot),
    message: None,
  }))
}

async fn list_playback(State(state): State<AppState>) -> Json<PlaybackListResponse> {
  Json(PlaybackListResponse {
    sessions: state.manager().list().await,
  })
}

async fn get_playback(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
  match state.manager().get(&id).await {
    Some(snapshot) => Ok(Json(snapshot)),
    None => Err(ApiError::NotFound(format!("session '{id}' not found"))),
  }
}

async fn stop_playback(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<PlaybackStopResponse>, ApiError> {
  let stopped = state.manager().stop(&id).await?;
  Ok(Json(PlaybackStopResponse { stopped }))
}

async fn retry_playback(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
  let snapshot = state.manager().retry(&id).await?;
  Ok(Json(snapshot))
}

async fn pool_status(State(state): State<AppState>) -> Json<PoolStatus> {
  Json(state.manager().pool_status())
}

async fn set_capacity(
  State(state): State<AppState>,
  Json(req): Json<CapacityUpdateRequest>,
) -> Json<PoolStatus> {
  info!(capacity = req.capacity, "pool capacity updated");
  state.manager().set_capacity(req.capacity);
  Json(state.manager().pool_status())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::GatewayConfig;
  use anyhow::Result;
  use async_trait::async_trait;
  use axum::body::Body;
  use axum::http::{Request, StatusCode};
  use common::health::{HealthSample, ReadyLevel};
  use common::playback::{ProtocolEndpoints, SessionState, StreamProtocol};
  use playback_core::{
    EndpointResolver, MediaBackend, MediaHandle, NoopMetricsSink, PipelineEvent, PlaybackError,
    PlaybackManager, RecoveryPolicy,
  };
  use std::sync::Arc;
  use tokio::sync::broadcast;
  use tower::ServiceExt;

  /// Media handle that confirms every load immediately and stays healthy.
  struct InstantMedia {
    events_tx: broadcast::Sender<PipelineEvent>,
  }

  impl InstantMedia {
    fn new() -> Self {
      let (events_tx, _) = broadcast::channel(16);
      Self { events_tx }
    }
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
      Ok(Arc::new(InstantMedia::new()))
    }
  }

  struct StubResolver {
    endpoints: ProtocolEndpoints,
    capacity_limit: Option<usize>,
  }

  #[async_trait]
  impl EndpointResolver for StubResolver {
    async fn resolve(&self, _stream_id: &str) -> Result<ProtocolEndpoints, PlaybackError> {
      if let Some(limit) = self.capacity_limit {
        return Err(PlaybackError::CapacityExceeded { limit });
      }
      Ok(self.endpoints.clone())
    }
  }

  fn test_config() -> GatewayConfig {
    GatewayConfig {
      bind_addr: "127.0.0.1:0".parse().unwrap(),
      resolver_base_url: "http://127.0.0.1:1".parse().unwrap(),
      player_base_url: "http://127.0.0.1:2".parse().unwrap(),
      fallback_collector_url: None,
      pool_capacity: 2,
      node_id: "test-node".into(),
    }
  }

  fn app_with(resolver: StubResolver, capacity: usize) -> (Router, AppState) {
    let manager = PlaybackManager::new(
      capacity,
      Arc::new(resolver),
      Arc::new(InstantBackend),
      Arc::new(NoopMetricsSink),
      RecoveryPolicy::default(),
    );
    let state = AppState::new(test_config(), manager);
    (router(state.clone()), state)
  }

  fn hls_only() -> ProtocolEndpoints {
    ProtocolEndpoints {
      webrtc: None,
      hls: Some("https://edge/cam-1/index.m3u8".into()),
      rtmp: None,
    }
  }

  async fn start_req(app: &Router, stream_id: &str) -> axum::response::Response {
    app
      .clone()
      .oneshot(
        Request::builder()
          .method("POST")
          .uri("/v1/playback")
          .header("content-type", "application/json")
          .body(Body::from(format!(r#"{{"stream_id":"{stream_id}"}}"#)))
          .unwrap(),
      )
      .await
      .unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn start_returns_session_snapshot() {
    let (app, _state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: None },
      2,
    );
    let resp = start_req(&app, "cam-1").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: PlaybackStartResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(body.accepted);
    let session = body.session.unwrap();
    assert_eq!(session.id, "cam-1");

    // give the driver a chance to confirm the connect
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let resp = app
      .clone()
      .oneshot(
        Request::builder()
          .uri("/v1/playback/cam-1")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let snapshot: SessionSnapshot = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.active_protocol, Some(StreamProtocol::Hls));
  }

  #[tokio::test(start_paused = true)]
  async fn pool_exhaustion_returns_429_with_limit() {
    let (app, _state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: None },
      2,
    );
    assert_eq!(start_req(&app, "cam-1").await.status(), StatusCode::OK);
    assert_eq!(start_req(&app, "cam-2").await.status(), StatusCode::OK);

    let resp = start_req(&app, "cam-3").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["limit"], 2);
  }

  #[tokio::test(start_paused = true)]
  async fn backend_capacity_signal_reconciles_pool() {
    let (app, state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: Some(1) },
      4,
    );
    let resp = start_req(&app, "cam-1").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["limit"], 1);
    assert_eq!(state.manager().pool_status().capacity, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn duplicate_start_conflicts() {
    let (app, _state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: None },
      2,
    );
    assert_eq!(start_req(&app, "cam-1").await.status(), StatusCode::OK);
    assert_eq!(start_req(&app, "cam-1").await.status(), StatusCode::CONFLICT);
  }

  #[tokio::test(start_paused = true)]
  async fn retry_of_healthy_session_conflicts() {
    let (app, _state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: None },
      2,
    );
    assert_eq!(start_req(&app, "cam-1").await.status(), StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let resp = app
      .clone()
      .oneshot(
        Request::builder()
          .method("POST")
          .uri("/v1/playback/cam-1/retry")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
  }

  #[tokio::test(start_paused = true)]
  async fn stop_releases_slot_and_unknown_session_is_404() {
    let (app, state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: None },
      1,
    );
    assert_eq!(start_req(&app, "cam-1").await.status(), StatusCode::OK);
    assert_eq!(state.manager().pool_status().active, 1);

    let resp = app
      .clone()
      .oneshot(
        Request::builder()
          .method("DELETE")
          .uri("/v1/playback/cam-1")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(state.manager().pool_status().active, 0);

    let resp = app
      .clone()
      .oneshot(
        Request::builder()
          .uri("/v1/playback/cam-1")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test(start_paused = true)]
  async fn capacity_update_is_soft() {
    let (app, state) = app_with(
      StubResolver { endpoints: hls_only(), capacity_limit: None },
      2,
    );
    assert_eq!(start_req(&app, "cam-1").await.status(), StatusCode::OK);
    assert_eq!(start_req(&app, "cam-2").await.status(), StatusCode::OK);

    let resp = app
      .clone()
      .oneshot(
        Request::builder()
          .method("PUT")
          .uri("/v1/pool/capacity")
          .header("content-type", "application/json")
          .body(Body::from(r#"{"capacity":1}"#))
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status = state.manager().pool_status();
    assert_eq!(status.capacity, 1);
    // both sessions keep their slots; only new admissions are gated
    assert_eq!(status.active, 2);
  }
}
