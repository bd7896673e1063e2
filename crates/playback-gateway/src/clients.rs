use async_trait::async_trait;
use common::playback::{ProtocolEndpoints, StreamProtocol};
use playback_core::{EndpointResolver, MetricsSink, PlaybackError};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Media endpoint resolution over HTTP. The backend admission point may
/// answer 429 with its authoritative stream limit; that becomes a
/// structured capacity error for the pool to reconcile against.
pub struct HttpEndpointResolver {
  base: Url,
  client: reqwest::Client,
}

#[derive(Deserialize)]
struct LimitExceededBody {
  max_streams: usize,
}

impl HttpEndpointResolver {
  pub fn new(base: Url) -> anyhow::Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(3))
      .timeout(Duration::from_secs(10))
      .build()?;
    Ok(Self { base, client })
  }
}

#[async_trait]
impl EndpointResolver for HttpEndpointResolver {
  async fn resolve(&self, stream_id: &str) -> Result<ProtocolEndpoints, PlaybackError> {
    let url = self
      .base
      .join(&format!("v1/streams/{stream_id}/endpoints"))
      .map_err(PlaybackError::resolver)?;
    let resp = self
      .client
      .get(url)
      .send()
      .await
      .map_err(PlaybackError::resolver)?;
    if resp.status() == StatusCode::TOO_MANY_REQUESTS {
      let body: LimitExceededBody = resp.json().await.map_err(PlaybackError::resolver)?;
      return Err(PlaybackError::CapacityExceeded {
        limit: body.max_streams,
      });
    }
    let resp = resp.error_for_status().map_err(PlaybackError::resolver)?;
    resp.json().await.map_err(PlaybackError::resolver)
  }
}

/// Fire-and-forget fallback reporting to an external collector. The POST
/// runs on its own task; failures are logged and dropped, never surfaced
/// to the protocol transition that triggered them.
pub struct HttpMetricsSink {
  endpoint: Url,
  client: reqwest::Client,
}

impl HttpMetricsSink {
  pub fn new(endpoint: Url) -> anyhow::Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(2))
      .timeout(Duration::from_secs(5))
      .build()?;
    Ok(Self { endpoint, client })
  }
}

impl MetricsSink for HttpMetricsSink {
  fn record_protocol_fallback(&self, session_id: &str, from: StreamProtocol, to: StreamProtocol) {
    let client = self.client.clone();
    let endpoint = self.endpoint.clone();
    let body = json!({
        "session_id": session_id,
        "from": from,
        "to": to,
    });
    tokio::spawn(async move {
      let result = client
        .post(endpoint)
        .json(&body)
        .send()
        .await
        .and_then(|r| r.error_for_status());
      if let Err(err) = result {
        debug!(error = %err, "fallback collector unreachable, report dropped");
      }
    });
  }
}
