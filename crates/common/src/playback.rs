use serde::{Deserialize, Serialize};

/// Streaming transport protocol for a playback session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    WebRtc,
    Hls,
    Rtmp,
}

impl StreamProtocol {
    /// Latency-vs-compatibility priority order, best first
    pub const PRIORITY: [StreamProtocol; 3] =
        [StreamProtocol::WebRtc, StreamProtocol::Hls, StreamProtocol::Rtmp];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::WebRtc => "webrtc",
            StreamProtocol::Hls => "hls",
            StreamProtocol::Rtmp => "rtmp",
        }
    }

    /// Position in the priority order (0 = most preferred)
    pub fn rank(&self) -> usize {
        match self {
            StreamProtocol::WebRtc => 0,
            StreamProtocol::Hls => 1,
            StreamProtocol::Rtmp => 2,
        }
    }
}

impl std::fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection URLs per transport, as reported by the media endpoint service.
/// A missing entry means the protocol is unavailable for this stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolEndpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtmp: Option<String>,
}

impl ProtocolEndpoints {
    pub fn url(&self, protocol: StreamProtocol) -> Option<&str> {
        match protocol {
            StreamProtocol::WebRtc => self.webrtc.as_deref(),
            StreamProtocol::Hls => self.hls.as_deref(),
            StreamProtocol::Rtmp => self.rtmp.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.webrtc.is_none() && self.hls.is_none() && self.rtmp.is_none()
    }
}

/// Playback session state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Ready,
    /// Playing, but on a protocol demoted from the preferred one
    Degraded,
    Stalled,
    Failed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Failed)
    }

    /// States in which the stall detector samples health
    pub fn is_playing(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Degraded | SessionState::Stalled
        )
    }
}

/// User-facing view of one playback session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    pub active_protocol: Option<StreamProtocol>,
    /// Human-readable status for the last error, if any
    pub last_error: Option<String>,
    /// Last confirmed healthy playback (epoch seconds)
    #[serde(default)]
    pub last_healthy_at: Option<u64>,
}

/// Request to start a playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStartRequest {
    pub stream_id: String,
}

/// Response for playback start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStartResponse {
    pub accepted: bool,
    pub session: Option<SessionSnapshot>,
    pub message: Option<String>,
}

/// Response for playback stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStopResponse {
    pub stopped: bool,
}

/// List playback sessions response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackListResponse {
    pub sessions: Vec<SessionSnapshot>,
}

/// Stream pool occupancy and bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub active: usize,
}

/// Request to resize the stream pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityUpdateRequest {
    pub capacity: usize,
}
