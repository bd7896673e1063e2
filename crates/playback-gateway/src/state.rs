use crate::config::GatewayConfig;
use playback_core::PlaybackManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

struct AppStateInner {
  config: GatewayConfig,
  manager: PlaybackManager,
}

impl AppState {
  pub fn new(config: GatewayConfig, manager: PlaybackManager) -> Self {
    Self {
      inner: Arc::new(AppStateInner { config, manager }),
    }
  }

  pub fn node_id(&self) -> &str {
    &self.inner.config.node_id
  }

  pub fn manager(&self) -> &PlaybackManager {
    &self.inner.manager
  }
}
