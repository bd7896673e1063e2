use std::time::Duration;

/// Timing and budget parameters for stall detection, reload rate limiting,
/// protocol fallback, and re-promotion. All values are policy, not
/// constants: each can be overridden from the environment.
#[derive(Clone, Debug)]
pub struct RecoveryPolicy {
    /// How long a protocol connect may take before demoting to the next one
    pub connect_timeout: Duration,
    /// Stall detector tick interval
    pub poll_interval: Duration,
    /// How long the unhealthy condition must persist before a stall is declared
    pub stall_confirm_window: Duration,
    /// How long a reload may take to reach "enough data"
    pub reload_confirm_timeout: Duration,
    /// Maximum reload attempts within `reload_window`
    pub max_reloads: u32,
    /// Rolling window for reload rate limiting
    pub reload_window: Duration,
    /// Delay before retrying a higher-priority protocol after a fallback
    pub repromote_delay: Duration,
    /// Non-fatal pipeline errors tolerated before escalating to fatal
    pub non_fatal_error_budget: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(env_u64("CONNECT_TIMEOUT_MS", 5_000)),
            poll_interval: Duration::from_millis(env_u64("STALL_POLL_MS", 5_000)),
            stall_confirm_window: Duration::from_millis(env_u64("STALL_CONFIRM_MS", 5_000)),
            reload_confirm_timeout: Duration::from_millis(env_u64("RELOAD_CONFIRM_MS", 3_000)),
            max_reloads: env_u32("RELOAD_MAX_ATTEMPTS", 3),
            reload_window: Duration::from_millis(env_u64("RELOAD_WINDOW_MS", 60_000)),
            repromote_delay: Duration::from_millis(env_u64("REPROMOTE_DELAY_MS", 60_000)),
            non_fatal_error_budget: env_u32("NONFATAL_ERROR_BUDGET", 3),
        }
    }
}

fn env_u32(key: &str, def: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(def)
}
fn env_u64(key: &str, def: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(def)
}
