//! HTTP driver for a remote player agent.
//!
//! The gateway never decodes media; it steers a player process that
//! exposes load/play/pause/recover controls plus a polled state endpoint
//! reporting the latest health sample and any pipeline events since the
//! last cursor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::health::{HealthSample, ReadyLevel};
use common::playback::StreamProtocol;
use playback_core::{MediaBackend, MediaHandle, PipelineEvent};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn empty_sample() -> HealthSample {
  HealthSample {
    buffered_ahead_secs: 0.0,
    ready_level: ReadyLevel::Nothing,
    paused: false,
  }
}

pub struct HttpPlayerBackend {
  base: Url,
  client: reqwest::Client,
}

impl HttpPlayerBackend {
  pub fn new(base: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(3))
      .timeout(Duration::from_secs(10))
      .build()?;
    Ok(Self { base, client })
  }
}

#[async_trait]
impl MediaBackend for HttpPlayerBackend {
  async fn open(&self, stream_id: &str) -> Result<Arc<dyn MediaHandle>> {
    let handle = HttpPlayerHandle::open(self.base.clone(), self.client.clone(), stream_id)?;
    Ok(Arc::new(handle))
  }
}

#[derive(Deserialize)]
struct PlayerStateBody {
  cursor: u64,
  sample: HealthSample,
  #[serde(default)]
  events: Vec<PlayerEventBody>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PlayerEventBody {
  ManifestParsed,
  LoadedData,
  Error { fatal: bool, message: String },
}

impl From<PlayerEventBody> for PipelineEvent {
  fn from(body: PlayerEventBody) -> Self {
    match body {
      PlayerEventBody::ManifestParsed => PipelineEvent::ManifestParsed,
      PlayerEventBody::LoadedData => PipelineEvent::LoadedData,
      PlayerEventBody::Error { fatal, message } => PipelineEvent::Error { fatal, message },
    }
  }
}

pub struct HttpPlayerHandle {
  base: Url,
  stream_id: String,
  client: reqwest::Client,
  events_tx: broadcast::Sender<PipelineEvent>,
  latest: Arc<Mutex<HealthSample>>,
  poll_guard: CancellationToken,
}

impl HttpPlayerHandle {
  fn open(base: Url, client: reqwest::Client, stream_id: &str) -> Result<Self> {
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let poll_guard = CancellationToken::new();
    let latest = Arc::new(Mutex::new(empty_sample()));

    let state_url = base
      .join(&format!("v1/players/{stream_id}/state"))
      .context("invalid player endpoint")?;

    {
      let client = client.clone();
      let events_tx = events_tx.clone();
      let latest = latest.clone();
      let poll_guard = poll_guard.clone();
      let id = stream_id.to_string();
      tokio::spawn(async move {
        let mut cursor: u64 = 0;
        loop {
          tokio::select! {
              _ = poll_guard.cancelled() => return,
              _ = tokio::time::sleep(STATE_POLL_INTERVAL) => {}
          }
          let mut url = state_url.clone();
          url
            .query_pairs_mut()
            .append_pair("cursor", &cursor.to_string());
          match client.get(url).send().await {
            Ok(resp) => match resp.error_for_status() {
              Ok(resp) => match resp.json::<PlayerStateBody>().await {
                Ok(state) => {
                  cursor = state.cursor;
                  if let Ok(mut slot) = latest.lock() {
                    *slot = state.sample;
                  }
                  for event in state.events {
                    let _ = events_tx.send(event.into());
                  }
                }
                Err(err) => debug!(player = %id, error = %err, "bad player state body"),
              },
              Err(err) => debug!(player = %id, error = %err, "player state poll rejected"),
            },
            Err(err) => debug!(player = %id, error = %err, "player state poll failed"),
          }
        }
      });
    }

    Ok(Self {
      base,
      stream_id: stream_id.to_string(),
      client,
      events_tx,
      latest,
      poll_guard,
    })
  }

  fn endpoint(&self, action: &str) -> Result<Url> {
    self
      .base
      .join(&format!("v1/players/{}/{action}", self.stream_id))
      .context("invalid player endpoint")
  }

  async fn post(&self, action: &str, body: Option<serde_json::Value>) -> Result<()> {
    let url = self.endpoint(action)?;
    let mut req = self.client.post(url);
    if let Some(body) = body {
      req = req.json(&body);
    }
    req
      .send()
      .await
      .with_context(|| format!("player {action} request failed"))?
      .error_for_status()
      .with_context(|| format!("player {action} returned error status"))?;
    Ok(())
  }
}

#[async_trait]
impl MediaHandle for HttpPlayerHandle {
  async fn load(&self, url: &str, protocol: StreamProtocol) -> Result<()> {
    self
      .post("load", Some(json!({ "url": url, "protocol": protocol })))
      .await
  }

  async fn play(&self) -> Result<()> {
    self.post("play", None).await
  }

  async fn pause(&self) -> Result<()> {
    self.post("pause", None).await
  }

  async fn recover(&self) -> Result<()> {
    self.post("recover", None).await
  }

  fn sample(&self) -> HealthSample {
    match self.latest.lock() {
      Ok(sample) => *sample,
      Err(_) => empty_sample(),
    }
  }

  fn events(&self) -> broadcast::Receiver<PipelineEvent> {
    self.events_tx.subscribe()
  }
}

impl Drop for HttpPlayerHandle {
  fn drop(&mut self) {
    self.poll_guard.cancel();
  }
}
