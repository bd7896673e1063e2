use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("playback_sessions_active", "Playback sessions holding a decode slot").unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static PROTOCOL_FALLBACKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("protocol_fallbacks_total", "Total automatic protocol demotions").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static STALLS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("stalls_total", "Total confirmed playback stalls").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RELOADS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("reloads_total", "Total source reload attempts").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SESSIONS_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("sessions_failed_total", "Sessions that reached the terminal failed state").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static POOL_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pool_rejections_total", "Admissions denied by the stream pool").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn render() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let mfs = REGISTRY.gather();
    encoder.encode(&mfs, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
