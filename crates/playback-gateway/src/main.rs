use anyhow::Result;
use playback_core::{MetricsSink, NoopMetricsSink, PlaybackManager, RecoveryPolicy};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod clients;
mod config;
mod error;
mod player;
mod routes;
mod state;

use clients::{HttpEndpointResolver, HttpMetricsSink};
use config::GatewayConfig;
use player::HttpPlayerBackend;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
  let config = GatewayConfig::from_env()?;
  let log_config = telemetry::LogConfig::new("playback-gateway")
    .with_version(env!("CARGO_PKG_VERSION"))
    .with_node_id(config.node_id.clone());
  telemetry::init_structured_logging(log_config);

  let resolver = Arc::new(HttpEndpointResolver::new(config.resolver_base_url.clone())?);
  let backend = Arc::new(HttpPlayerBackend::new(config.player_base_url.clone())?);
  let sink: Arc<dyn MetricsSink> = match &config.fallback_collector_url {
    Some(url) => Arc::new(HttpMetricsSink::new(url.clone())?),
    None => Arc::new(NoopMetricsSink),
  };

  let manager = PlaybackManager::new(
    config.pool_capacity,
    resolver,
    backend,
    sink,
    RecoveryPolicy::default(),
  );
  let state = AppState::new(config.clone(), manager);
  let app = routes::router(state.clone());

  let listener = TcpListener::bind(&config.bind_addr).await?;
  info!(addr = %config.bind_addr, node = %state.node_id(), "playback-gateway started");
  axum::serve(listener, app).await?;

  Ok(())
}
