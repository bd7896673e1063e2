use common::playback::StreamProtocol;

/// Fire-and-forget reporting of protocol transitions to an external
/// metrics collaborator. Implementations must neither block the caller
/// nor propagate failures; an unreachable collector is logged and ignored.
pub trait MetricsSink: Send + Sync {
    fn record_protocol_fallback(
        &self,
        session_id: &str,
        from: StreamProtocol,
        to: StreamProtocol,
    );
}

/// Sink that drops every report; useful in tests and tools.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_protocol_fallback(&self, _: &str, _: StreamProtocol, _: StreamProtocol) {}
}
