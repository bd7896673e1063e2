use anyhow::{Context, Result};
use reqwest::Url;
use std::{env, net::SocketAddr};

#[derive(Clone)]
pub struct GatewayConfig {
  pub bind_addr: SocketAddr,
  pub resolver_base_url: Url,
  pub player_base_url: Url,
  pub fallback_collector_url: Option<Url>,
  pub pool_capacity: usize,
  pub node_id: String,
}

impl GatewayConfig {
  pub fn from_env() -> Result<Self> {
    let bind = env::var("PLAYBACK_GATEWAY_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
    let bind_addr: SocketAddr = bind.parse().context("invalid PLAYBACK_GATEWAY_ADDR")?;

    let resolver = env::var("MEDIA_RESOLVER_ENDPOINT")
      .unwrap_or_else(|_| "http://127.0.0.1:8091".to_string());
    let resolver_base_url = Url::parse(&resolver).context("invalid MEDIA_RESOLVER_ENDPOINT")?;

    let player =
      env::var("PLAYER_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8092".to_string());
    let player_base_url = Url::parse(&player).context("invalid PLAYER_ENDPOINT")?;

    let fallback_collector_url = match env::var("FALLBACK_COLLECTOR_ENDPOINT") {
      Ok(raw) => Some(Url::parse(&raw).context("invalid FALLBACK_COLLECTOR_ENDPOINT")?),
      Err(_) => None,
    };

    let pool_capacity = env::var("STREAM_POOL_CAPACITY")
      .ok()
      .and_then(|v| v.parse().ok())
      .unwrap_or(4);

    let node_id = env::var("NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    Ok(Self {
      bind_addr,
      resolver_base_url,
      player_base_url,
      fallback_collector_url,
      pool_capacity,
      node_id,
    })
  }
}
