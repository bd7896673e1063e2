//! Per-session playback driver.
//!
//! Each session owns three cooperating tasks: a connect/event driver, a
//! periodic stall detector, and (after a fallback) a one-shot re-promotion
//! timer. All of them select on the session's cancellation token, so
//! destroying the session cancels every pending timer and in-flight wait.
//! Mutable session state lives behind one `tokio::sync::Mutex`; the stall
//! detector holds it across a reload, which keeps health checks and
//! reloads strictly sequential within a session.

use crate::media::{MediaHandle, PipelineEvent};
use crate::metrics;
use crate::negotiator;
use crate::policy::RecoveryPolicy;
use crate::sink::MetricsSink;
use crate::tracker::{self, Effect, SessionEvent};
use crate::PlaybackError;
use anyhow::{anyhow, Result};
use common::health::ReadyLevel;
use common::playback::{ProtocolEndpoints, SessionSnapshot, SessionState, StreamProtocol};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type StalledHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type RecoveryHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type ProtocolSwitchHook =
    Arc<dyn Fn(&str, Option<StreamProtocol>, StreamProtocol) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Presentation-layer callbacks, all optional. Hooks are invoked inline
/// on the session's own tasks and must be cheap and non-blocking.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub on_stalled: Option<StalledHook>,
    pub on_recovery: Option<RecoveryHook>,
    pub on_protocol_switch: Option<ProtocolSwitchHook>,
    pub on_error: Option<ErrorHook>,
}

pub(crate) struct Session {
    pub(crate) id: String,
    media: Arc<dyn MediaHandle>,
    sink: Arc<dyn MetricsSink>,
    policy: RecoveryPolicy,
    hooks: SessionHooks,
    cancel: CancellationToken,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: SessionState,
    endpoints: ProtocolEndpoints,
    active_protocol: Option<StreamProtocol>,
    /// True while playing on a protocol demoted from the preferred one
    demoted: bool,
    last_error: Option<String>,
    last_healthy_at: Option<u64>,
    /// Reload attempt times inside the rolling rate-limit window
    retry_times: VecDeque<Instant>,
    /// When the current unhealthy streak began
    stall_since: Option<Instant>,
    non_fatal_errors: u32,
    /// Cancels the armed re-promotion timer, if any
    repromote_guard: Option<CancellationToken>,
    /// Cancels the current driver run's loops (replaced on manual retry)
    run_guard: Option<CancellationToken>,
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Session {
    pub(crate) fn new(
        id: String,
        endpoints: ProtocolEndpoints,
        media: Arc<dyn MediaHandle>,
        sink: Arc<dyn MetricsSink>,
        policy: RecoveryPolicy,
        hooks: SessionHooks,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            media,
            sink,
            policy,
            hooks,
            cancel: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                endpoints,
                active_protocol: None,
                demoted: false,
                last_error: None,
                last_healthy_at: None,
                retry_times: VecDeque::new(),
                stall_since: None,
                non_fatal_errors: 0,
                repromote_guard: None,
                run_guard: None,
            }),
        })
    }

    /// Begin playback: `Idle -> Connecting`, then spawn the driver.
    pub(crate) async fn begin(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            self.apply(&mut inner, &SessionEvent::PlaybackRequested, None);
        }
        self.spawn_driver();
    }

    /// Destroy the session, cancelling every pending timer and wait.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            id: self.id.clone(),
            state: inner.state,
            active_protocol: inner.active_protocol,
            last_error: inner.last_error.clone(),
            last_healthy_at: inner.last_healthy_at,
        }
    }

    /// Explicit user retry. Only valid from `Failed`; clears the reload
    /// rate-limit history and re-enters the state machine.
    pub(crate) async fn retry(self: &Arc<Self>) -> Result<(), PlaybackError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Failed {
                return Err(PlaybackError::NotRetryable {
                    id: self.id.clone(),
                    state: inner.state,
                });
            }
            info!(session = %self.id, "manual retry");
            self.apply(&mut inner, &SessionEvent::ManualRetry, None);
            inner.non_fatal_errors = 0;
            inner.stall_since = None;
            inner.demoted = false;
            inner.last_error = None;
            inner.active_protocol = None;
        }
        self.spawn_driver();
        Ok(())
    }

    fn spawn_driver(self: &Arc<Self>) {
        let session = self.clone();
        tokio::spawn(async move {
            let cancel = session.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(session = %session.id, "session cancelled");
                }
                _ = session.clone().drive() => {}
            }
        });
    }

    async fn drive(self: Arc<Self>) {
        let run_guard = self.cancel.child_token();
        {
            let mut inner = self.inner.lock().await;
            if let Some(old) = inner.run_guard.replace(run_guard.clone()) {
                old.cancel();
            }
        }
        if !self.connect_cycle(None).await {
            return;
        }
        let events = self.clone().event_loop(run_guard.clone());
        let detector = self.clone().detector_loop(run_guard);
        tokio::join!(events, detector);
    }

    /// Apply one event to the state machine and perform its synchronous
    /// effects. Async effects (fallback, local recovery) are the caller's
    /// responsibility, driven by the returned effect list.
    fn apply(
        &self,
        inner: &mut SessionInner,
        event: &SessionEvent,
        error_msg: Option<&str>,
    ) -> Vec<Effect> {
        let transition = tracker::transition(inner.state, event);
        if transition.next != inner.state {
            debug!(
                session = %self.id,
                from = ?inner.state,
                to = ?transition.next,
                event = ?event,
                "state transition"
            );
        }
        inner.state = transition.next;
        for effect in &transition.effects {
            match effect {
                Effect::EmitStalled => {
                    if let Some(hook) = &self.hooks.on_stalled {
                        hook(&self.id);
                    }
                }
                Effect::EmitRecovery => {
                    inner.last_error = None;
                    if let Some(hook) = &self.hooks.on_recovery {
                        hook(&self.id);
                    }
                }
                Effect::EmitError => {
                    let msg = error_msg.unwrap_or("playback failed").to_string();
                    inner.last_error = Some(msg.clone());
                    metrics::SESSIONS_FAILED_TOTAL.inc();
                    if let Some(hook) = &self.hooks.on_error {
                        hook(&self.id, &msg);
                    }
                }
                Effect::ClearRetryHistory => inner.retry_times.clear(),
                // StartDetector/StopDetector are realized by the detector
                // loop gating on the session state; BeginFallback and
                // AttemptLocalRecovery are async and handled by the caller.
                _ => {}
            }
        }
        if inner.state == SessionState::Failed {
            if let Some(guard) = inner.repromote_guard.take() {
                guard.cancel();
            }
            if let Some(guard) = inner.run_guard.take() {
                guard.cancel();
            }
        }
        transition.effects
    }

    /// Connect, demoting down the protocol priority list until one
    /// transport delivers decodable data or none are left. Returns true
    /// once playing.
    async fn connect_cycle(self: &Arc<Self>, start: Option<StreamProtocol>) -> bool {
        let (mut current, endpoints) = {
            let mut inner = self.inner.lock().await;
            // the protocol is about to change; a pending re-promotion is stale
            if let Some(guard) = inner.repromote_guard.take() {
                guard.cancel();
            }
            let endpoints = inner.endpoints.clone();
            match start.or_else(|| negotiator::select_initial(&endpoints)) {
                Some(protocol) => (protocol, endpoints),
                None => {
                    self.apply(
                        &mut inner,
                        &SessionEvent::ConnectTimedOut { fallback_available: false },
                        Some("no usable endpoint for any protocol"),
                    );
                    return false;
                }
            }
        };

        loop {
            let Some(url) = endpoints.url(current).map(str::to_string) else {
                // negotiator only yields protocols with endpoints
                return false;
            };
            {
                let mut inner = self.inner.lock().await;
                let from = inner.active_protocol;
                inner.active_protocol = Some(current);
                if from != Some(current) {
                    if let Some(hook) = &self.hooks.on_protocol_switch {
                        hook(&self.id, from, current);
                    }
                }
            }
            info!(session = %self.id, protocol = %current, "connecting");
            match self.connect_attempt(current, &url).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().await;
                    let demoted = inner.demoted;
                    self.apply(&mut inner, &SessionEvent::Connected { demoted }, None);
                    inner.last_healthy_at = Some(epoch_secs());
                    inner.stall_since = None;
                    inner.non_fatal_errors = 0;
                    if demoted {
                        if let Some(target) =
                            negotiator::repromotion_target(&inner.endpoints, current)
                        {
                            self.schedule_repromotion(&mut inner, target);
                        }
                    }
                    info!(session = %self.id, protocol = %current, demoted, "playback ready");
                    return true;
                }
                Err(err) => {
                    let next = negotiator::next_fallback(&endpoints, current);
                    let mut inner = self.inner.lock().await;
                    match next {
                        Some(next_protocol) => {
                            warn!(
                                session = %self.id,
                                from = %current,
                                to = %next_protocol,
                                error = %err,
                                "protocol connect failed, falling back"
                            );
                            self.apply(
                                &mut inner,
                                &SessionEvent::ConnectTimedOut { fallback_available: true },
                                None,
                            );
                            inner.demoted = true;
                            drop(inner);
                            metrics::PROTOCOL_FALLBACKS_TOTAL.inc();
                            self.sink
                                .record_protocol_fallback(&self.id, current, next_protocol);
                            current = next_protocol;
                        }
                        None => {
                            self.apply(
                                &mut inner,
                                &SessionEvent::ConnectTimedOut { fallback_available: false },
                                Some(&format!("unable to connect on any protocol: {err}")),
                            );
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// One bounded connect attempt: load, play, then wait for decodable
    /// data. Timeout or a fatal pipeline error fails the attempt.
    async fn connect_attempt(&self, protocol: StreamProtocol, url: &str) -> Result<()> {
        let mut events = self.media.events();
        self.media.load(url, protocol).await?;
        self.media.play().await?;
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(PipelineEvent::ManifestParsed) | Ok(PipelineEvent::LoadedData) => {
                        return Ok(())
                    }
                    Ok(PipelineEvent::Error { fatal: true, message }) => {
                        return Err(anyhow!("fatal pipeline error: {message}"))
                    }
                    Ok(PipelineEvent::Error { fatal: false, message }) => {
                        debug!(session = %self.id, %message, "transient error during connect");
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(anyhow!("pipeline event channel closed"))
                    }
                }
            }
        };
        match timeout(self.policy.connect_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "connect timed out after {:?}",
                self.policy.connect_timeout
            )),
        }
    }

    /// React to pipeline events for the lifetime of the driver run.
    async fn event_loop(self: Arc<Self>, run_guard: CancellationToken) {
        let mut events = self.media.events();
        loop {
            let event = tokio::select! {
                _ = run_guard.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(PipelineEvent::Error { fatal, message }) => {
                    self.handle_pipeline_error(fatal, &message).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session = %self.id, skipped, "pipeline events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn handle_pipeline_error(self: &Arc<Self>, fatal: bool, message: &str) {
        let escalate = if fatal {
            true
        } else {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_playing() {
                return;
            }
            inner.non_fatal_errors += 1;
            if inner.non_fatal_errors > self.policy.non_fatal_error_budget {
                warn!(
                    session = %self.id,
                    errors = inner.non_fatal_errors,
                    "non-fatal error budget exhausted, escalating"
                );
                true
            } else {
                self.apply(&mut inner, &SessionEvent::NonFatalError, None);
                false
            }
        };

        if !escalate {
            debug!(session = %self.id, %message, "recovering from transient pipeline error");
            if let Err(err) = self.media.recover().await {
                warn!(session = %self.id, error = %err, "local recovery failed");
            }
            return;
        }

        let (fallback, current) = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_playing() {
                // a connect attempt in progress handles its own errors
                return;
            }
            let current = inner.active_protocol;
            let next = current.and_then(|c| negotiator::next_fallback(&inner.endpoints, c));
            self.apply(
                &mut inner,
                &SessionEvent::FatalError { fallback_available: next.is_some() },
                Some(&format!("fatal pipeline error: {message}")),
            );
            if next.is_some() {
                inner.demoted = true;
            }
            (next, current)
        };

        if let (Some(next), Some(current)) = (fallback, current) {
            warn!(
                session = %self.id,
                from = %current,
                to = %next,
                %message,
                "fatal pipeline error, falling back"
            );
            metrics::PROTOCOL_FALLBACKS_TOTAL.inc();
            self.sink.record_protocol_fallback(&self.id, current, next);
            self.connect_cycle(Some(next)).await;
        }
    }

    /// Periodic health check. Gated on the session state, so it idles
    /// through reconnects and dies with the run guard on failure.
    async fn detector_loop(self: Arc<Self>, run_guard: CancellationToken) {
        loop {
            tokio::select! {
                _ = run_guard.cancelled() => return,
                _ = sleep(self.policy.poll_interval) => {}
            }
            self.health_tick().await;
        }
    }

    async fn health_tick(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_playing() {
            inner.stall_since = None;
            return;
        }

        let sample = self.media.sample();
        if sample.is_healthy() {
            inner.stall_since = None;
            inner.non_fatal_errors = 0;
            inner.last_healthy_at = Some(epoch_secs());
            if inner.state == SessionState::Stalled {
                info!(session = %self.id, "buffer resumed without reload");
                let demoted = inner.demoted;
                self.apply(&mut inner, &SessionEvent::BufferRecovered { demoted }, None);
            }
            return;
        }

        // A single unhealthy sample is never sufficient: the condition
        // must persist for the whole confirmation window.
        let now = Instant::now();
        let since = *inner.stall_since.get_or_insert(now);
        if now.duration_since(since) < self.policy.stall_confirm_window {
            return;
        }

        if inner.state != SessionState::Stalled {
            warn!(
                session = %self.id,
                buffered_secs = sample.buffered_ahead_secs,
                ready = ?sample.ready_level,
                "stall confirmed"
            );
            metrics::STALLS_TOTAL.inc();
            self.apply(&mut inner, &SessionEvent::StallConfirmed, None);
        }

        // Rolling-window rate limit, pruned on every check
        let window = self.policy.reload_window;
        while inner
            .retry_times
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            inner.retry_times.pop_front();
        }
        if inner.retry_times.len() >= self.policy.max_reloads as usize {
            warn!(session = %self.id, "reload rate limit exhausted");
            self.apply(
                &mut inner,
                &SessionEvent::RetryBudgetExhausted,
                Some(&format!(
                    "stalled repeatedly: {} reloads within {}s; manual retry required",
                    self.policy.max_reloads,
                    window.as_secs()
                )),
            );
            return;
        }
        inner.retry_times.push_back(now);
        metrics::RELOADS_TOTAL.inc();

        let Some(protocol) = inner.active_protocol else { return };
        let Some(url) = inner.endpoints.url(protocol).map(str::to_string) else {
            return;
        };
        info!(
            session = %self.id,
            %protocol,
            attempt = inner.retry_times.len(),
            "reloading stalled source"
        );
        // The session lock is held across the reload, so no other health
        // check or fallback decision can interleave with it.
        if self.reload_and_confirm(&url, protocol).await {
            let demoted = inner.demoted;
            inner.stall_since = None;
            inner.last_healthy_at = Some(epoch_secs());
            self.apply(&mut inner, &SessionEvent::ReloadSucceeded { demoted }, None);
        } else {
            // the next attempt requires another full confirmation window
            inner.stall_since = Some(Instant::now());
            self.apply(&mut inner, &SessionEvent::ReloadFailed, None);
        }
    }

    /// Issue a source reload and wait (bounded) for the decoder to report
    /// enough data again.
    async fn reload_and_confirm(&self, url: &str, protocol: StreamProtocol) -> bool {
        if let Err(err) = self.media.load(url, protocol).await {
            warn!(session = %self.id, error = %err, "reload failed to issue");
            return false;
        }
        if let Err(err) = self.media.play().await {
            warn!(session = %self.id, error = %err, "play after reload failed");
            return false;
        }
        let confirm = async {
            loop {
                if self.media.sample().ready_level >= ReadyLevel::EnoughData {
                    return;
                }
                sleep(Duration::from_millis(200)).await;
            }
        };
        timeout(self.policy.reload_confirm_timeout, confirm)
            .await
            .is_ok()
    }

    /// Arm (or re-arm) the one-shot timer that attempts a return to a
    /// higher-priority protocol. The guard covers the attempt itself, not
    /// just the delay: cancellation on session destruction, on any protocol
    /// change, or on failure also aborts an attempt already in flight, so
    /// no media call or hook can fire after the session is gone.
    fn schedule_repromotion(self: &Arc<Self>, inner: &mut SessionInner, target: StreamProtocol) {
        if let Some(old) = inner.repromote_guard.take() {
            old.cancel();
        }
        let guard = self.cancel.child_token();
        inner.repromote_guard = Some(guard.clone());
        let session = self.clone();
        let delay = self.policy.repromote_delay;
        info!(session = %self.id, %target, delay_secs = delay.as_secs(), "re-promotion scheduled");
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = async {
                    sleep(delay).await;
                    session.attempt_repromotion(target).await;
                } => {}
            }
        });
    }

    async fn attempt_repromotion(self: Arc<Self>, target: StreamProtocol) {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_playing() {
            return;
        }
        let Some(current) = inner.active_protocol else { return };
        if current.rank() <= target.rank() {
            return;
        }
        let Some(url) = inner.endpoints.url(target).map(str::to_string) else {
            return;
        };
        info!(session = %self.id, from = %current, to = %target, "attempting re-promotion");
        match self.connect_attempt(target, &url).await {
            Ok(()) => {
                inner.active_protocol = Some(target);
                // still demoted if an even better protocol exists
                let demoted = negotiator::repromotion_target(&inner.endpoints, target).is_some();
                inner.demoted = demoted;
                inner.stall_since = None;
                inner.last_healthy_at = Some(epoch_secs());
                self.apply(&mut inner, &SessionEvent::Connected { demoted }, None);
                if let Some(hook) = &self.hooks.on_protocol_switch {
                    hook(&self.id, Some(current), target);
                }
                if demoted {
                    if let Some(next_target) =
                        negotiator::repromotion_target(&inner.endpoints, target)
                    {
                        self.schedule_repromotion(&mut inner, next_target);
                    }
                } else {
                    inner.repromote_guard = None;
                    info!(session = %self.id, protocol = %target, "re-promotion succeeded");
                }
            }
            Err(err) => {
                debug!(session = %self.id, error = %err, "re-promotion failed, staying demoted");
                // restore the working source and try again later
                if let Err(err) = self.media.load(&url_for(&inner.endpoints, current), current).await
                {
                    warn!(session = %self.id, error = %err, "failed to restore fallback source");
                }
                if let Err(err) = self.media.play().await {
                    warn!(session = %self.id, error = %err, "failed to resume fallback source");
                }
                self.schedule_repromotion(&mut inner, target);
            }
        }
    }
}

fn url_for(endpoints: &ProtocolEndpoints, protocol: StreamProtocol) -> String {
    endpoints.url(protocol).unwrap_or_default().to_string()
}
