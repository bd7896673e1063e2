//! Playback state machine.
//!
//! The transition function is pure: timers and media I/O live in the
//! session driver, which normalizes raw pipeline signals into
//! [`SessionEvent`]s, applies [`transition`], and then performs the
//! returned [`Effect`]s. `Failed` is terminal until an explicit
//! [`SessionEvent::ManualRetry`]; every event that does not apply in the
//! current state is a no-op.

use common::playback::SessionState;

/// Normalized inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Caller requested playback of this session
    PlaybackRequested,
    /// Decodable data confirmed (manifest parsed / loadeddata).
    /// `demoted` is true when the connection runs on a fallback protocol.
    Connected { demoted: bool },
    /// Stall detector confirmed an unhealthy window on an unpaused pipeline
    StallConfirmed,
    /// Buffer resumed advancing without a reload
    BufferRecovered { demoted: bool },
    /// A reload reached "enough data" within its confirmation timeout
    ReloadSucceeded { demoted: bool },
    /// A reload did not confirm in time
    ReloadFailed,
    /// Fatal pipeline error for the current protocol attempt
    FatalError { fallback_available: bool },
    /// Protocol connect exceeded its timeout (treated like a fatal error)
    ConnectTimedOut { fallback_available: bool },
    /// Transient pipeline error, still within the non-fatal budget
    NonFatalError,
    /// Reload rate limit exhausted within the rolling window
    RetryBudgetExhausted,
    /// Explicit user retry
    ManualRetry,
}

/// Side effects the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Invoke the `on_stalled` hook
    EmitStalled,
    /// Invoke the `on_recovery` hook
    EmitRecovery,
    /// Invoke the `on_error` hook with the session's status message
    EmitError,
    /// Arm the periodic stall detector
    StartDetector,
    /// Disarm the stall detector
    StopDetector,
    /// Demote to the next-priority protocol and reconnect
    BeginFallback,
    /// Invoke the protocol-specific recovery primitive, no state change
    AttemptLocalRecovery,
    /// Reset reload rate-limit bookkeeping
    ClearRetryHistory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

fn stay(state: SessionState) -> Transition {
    Transition { next: state, effects: Vec::new() }
}

fn playing(demoted: bool) -> SessionState {
    if demoted {
        SessionState::Degraded
    } else {
        SessionState::Ready
    }
}

fn stay_playing(demoted: bool) -> Transition {
    Transition { next: playing(demoted), effects: Vec::new() }
}

/// Apply one event to the session state machine.
pub fn transition(state: SessionState, event: &SessionEvent) -> Transition {
    use Effect::*;
    use SessionEvent::*;
    use SessionState::*;

    // Failed is terminal: only a manual retry re-enters the machine.
    if state == Failed {
        return match event {
            ManualRetry => Transition {
                next: Connecting,
                effects: vec![ClearRetryHistory],
            },
            _ => stay(Failed),
        };
    }

    match (state, event) {
        (Idle, PlaybackRequested) => stay(Connecting),

        (Connecting, Connected { demoted }) => Transition {
            next: playing(*demoted),
            effects: vec![StartDetector],
        },
        (Connecting, ConnectTimedOut { fallback_available })
        | (Connecting, FatalError { fallback_available }) => {
            if *fallback_available {
                Transition { next: Connecting, effects: vec![BeginFallback] }
            } else {
                Transition { next: Failed, effects: vec![EmitError] }
            }
        }

        // A successful re-promotion (or late confirmation) while playing
        // just re-settles the playing state for the new protocol.
        (Ready, Connected { demoted })
        | (Degraded, Connected { demoted })
        | (Stalled, Connected { demoted }) => stay_playing(*demoted),

        (Ready, StallConfirmed) | (Degraded, StallConfirmed) => Transition {
            next: Stalled,
            effects: vec![EmitStalled],
        },

        (Stalled, BufferRecovered { demoted }) => Transition {
            next: playing(*demoted),
            effects: vec![EmitRecovery],
        },
        (Stalled, ReloadSucceeded { demoted }) => Transition {
            next: playing(*demoted),
            effects: vec![EmitRecovery, ClearRetryHistory],
        },
        (Stalled, ReloadFailed) => stay(Stalled),

        (Ready, FatalError { fallback_available })
        | (Degraded, FatalError { fallback_available })
        | (Stalled, FatalError { fallback_available }) => {
            if *fallback_available {
                Transition {
                    next: Connecting,
                    effects: vec![StopDetector, BeginFallback],
                }
            } else {
                Transition {
                    next: Failed,
                    effects: vec![StopDetector, EmitError],
                }
            }
        }

        (Ready, RetryBudgetExhausted)
        | (Degraded, RetryBudgetExhausted)
        | (Stalled, RetryBudgetExhausted) => Transition {
            next: Failed,
            effects: vec![StopDetector, EmitError],
        },

        // Transient errors are recovered locally, never surfaced
        (Connecting, NonFatalError)
        | (Ready, NonFatalError)
        | (Degraded, NonFatalError)
        | (Stalled, NonFatalError) => Transition {
            next: state,
            effects: vec![AttemptLocalRecovery],
        },

        // Everything else does not apply in this state
        _ => stay(state),
    }
}
