use serde::{Deserialize, Serialize};

/// Coarse readiness of the underlying media pipeline, lowest first.
/// Mirrors the readiness ladder a decoder reports for its current source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReadyLevel {
    Nothing,
    Metadata,
    CurrentData,
    EnoughData,
}

/// One observation of the media pipeline, taken by the stall detector.
/// Only the most recent sample is ever retained per session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthSample {
    /// Decoded-but-unplayed media ahead of the playhead
    pub buffered_ahead_secs: f64,
    pub ready_level: ReadyLevel,
    /// Paused by policy or by the user; a paused pipeline is never stalled
    pub paused: bool,
}

impl HealthSample {
    /// A sample counts as healthy when the decoder has enough data,
    /// or when playback is deliberately paused.
    pub fn is_healthy(&self) -> bool {
        self.paused || self.ready_level >= ReadyLevel::EnoughData
    }
}
