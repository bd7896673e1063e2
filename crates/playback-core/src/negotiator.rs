//! Protocol selection and fallback ordering.
//!
//! Priority is `webrtc > hls > rtmp`: lowest latency first, falling back
//! towards compatibility. Selection only ever considers protocols for
//! which the endpoint service reported a URL.

use common::playback::{ProtocolEndpoints, StreamProtocol};

/// Highest-priority protocol with a usable endpoint, if any.
pub fn select_initial(endpoints: &ProtocolEndpoints) -> Option<StreamProtocol> {
    StreamProtocol::PRIORITY
        .into_iter()
        .find(|p| endpoints.url(*p).is_some())
}

/// Next lower-priority protocol with a usable endpoint, after `current`
/// failed to connect.
pub fn next_fallback(
    endpoints: &ProtocolEndpoints,
    current: StreamProtocol,
) -> Option<StreamProtocol> {
    StreamProtocol::PRIORITY
        .into_iter()
        .filter(|p| p.rank() > current.rank())
        .find(|p| endpoints.url(*p).is_some())
}

/// Highest-priority endpoint strictly better than `current`, used by the
/// timed re-promotion attempt after a fallback.
pub fn repromotion_target(
    endpoints: &ProtocolEndpoints,
    current: StreamProtocol,
) -> Option<StreamProtocol> {
    StreamProtocol::PRIORITY
        .into_iter()
        .filter(|p| p.rank() < current.rank())
        .find(|p| endpoints.url(*p).is_some())
}
