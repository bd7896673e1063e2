//! Adaptive stream playback and recovery core.
//!
//! Protocol negotiation with fallback and timed re-promotion, a
//! per-session playback state machine, periodic stall detection with
//! rate-limited reloads, and a capacity-bounded pool of decode sessions.
//! Media decoding, endpoint resolution, and metrics collection are
//! external collaborators injected through the traits in [`media`],
//! [`resolver`], and [`sink`].

pub mod error;
pub mod manager;
pub mod media;
pub mod metrics;
pub mod negotiator;
pub mod policy;
pub mod pool;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod tracker;

pub use error::PlaybackError;
pub use manager::PlaybackManager;
pub use media::{MediaBackend, MediaHandle, PipelineEvent};
pub use policy::RecoveryPolicy;
pub use pool::StreamPool;
pub use resolver::EndpointResolver;
pub use session::SessionHooks;
pub use sink::{MetricsSink, NoopMetricsSink};
