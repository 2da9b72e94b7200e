//! Presence debouncer.
//!
//! Turns a stream of per-frame presence signals into debounced
//! activation/deactivation events. The first detection activates immediately;
//! deactivation only happens after the inactivity window passes with no
//! refreshing signal.
//!
//! The state machine is time-explicit: every input carries `now`, so it can be
//! driven by the real event loop in `pipeline` or stepped through virtual time
//! in tests.
//!
//! # Timer identity
//!
//! Each arming of the inactivity timer gets a fresh `TimerToken`. Expiry is
//! only honored for the token that is currently armed, so a deadline computed
//! before a rearm can never deactivate presence after it.

use anyhow::anyhow;
use serde::Deserialize;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::record::PresenceSignal;

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// What an empty (or undecodable) frame does to a pending inactivity timer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyFramePolicy {
    /// Any processed line extends presence by rearming the timer.
    #[default]
    Refresh,
    /// Only frames with detections rearm the timer.
    Ignore,
}

impl FromStr for EmptyFramePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "refresh" => Ok(Self::Refresh),
            "ignore" => Ok(Self::Ignore),
            other => Err(anyhow!(
                "unknown empty frame policy '{}'; expected 'refresh' or 'ignore'",
                other
            )),
        }
    }
}

impl std::fmt::Display for EmptyFramePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refresh => write!(f, "refresh"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

/// Debounced transition handed to the event sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    Activated,
    /// Presence ended after `timeout` with no refreshing signal.
    Deactivated { timeout: Duration },
}

/// Identity of one arming of the inactivity timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl TimerToken {
    pub fn generation(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug)]
struct ArmedTimer {
    token: TimerToken,
    deadline: Instant,
}

/// Inactivity timer with generation-checked expiry.
#[derive(Debug, Default)]
pub struct InactivityTimer {
    generation: u64,
    armed: Option<ArmedTimer>,
}

impl InactivityTimer {
    /// Arm (or rearm) the timer; any earlier token becomes stale.
    pub fn arm(&mut self, now: Instant, timeout: Duration) -> TimerToken {
        self.generation += 1;
        let token = TimerToken(self.generation);
        self.armed = Some(ArmedTimer {
            token,
            deadline: now + timeout,
        });
        token
    }

    pub fn disarm(&mut self) {
        self.generation += 1;
        self.armed = None;
    }

    pub fn pending(&self) -> Option<(TimerToken, Instant)> {
        self.armed.map(|armed| (armed.token, armed.deadline))
    }

    /// Consume the armed timer if `token` is current and its deadline passed.
    fn fire(&mut self, token: TimerToken, now: Instant) -> Expiry {
        match self.armed {
            Some(armed) if armed.token == token => {
                if now < armed.deadline {
                    Expiry::Early
                } else {
                    self.armed = None;
                    Expiry::Fired
                }
            }
            _ => Expiry::Stale,
        }
    }
}

enum Expiry {
    Fired,
    Early,
    Stale,
}

/// The debouncer's only mutable state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceState {
    pub active: bool,
    pub timeout: Duration,
}

/// Outcome of a timer expiry, for callers that track stale fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerOutcome {
    Transition(PresenceEvent),
    /// Current timer fired while already idle.
    Idle,
    /// Token was superseded by a later rearm.
    Stale,
    /// Deadline has not been reached yet; the timer stays armed.
    NotYetDue,
}

#[derive(Debug)]
pub struct Debouncer {
    state: DebounceState,
    timer: InactivityTimer,
    empty_frames: EmptyFramePolicy,
}

impl Debouncer {
    pub fn new(timeout: Duration) -> Self {
        Self::with_policy(timeout, EmptyFramePolicy::default())
    }

    pub fn with_policy(timeout: Duration, empty_frames: EmptyFramePolicy) -> Self {
        Self {
            state: DebounceState {
                active: false,
                timeout,
            },
            timer: InactivityTimer::default(),
            empty_frames,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    pub fn empty_frame_policy(&self) -> EmptyFramePolicy {
        self.empty_frames
    }

    /// The armed timer, if any. Only armed while active.
    pub fn pending_timer(&self) -> Option<(TimerToken, Instant)> {
        self.timer.pending()
    }

    pub fn on_signal(&mut self, signal: PresenceSignal, now: Instant) -> Option<PresenceEvent> {
        match signal {
            PresenceSignal::Detected => {
                self.timer.arm(now, self.state.timeout);
                if self.state.active {
                    return None;
                }
                self.state.active = true;
                Some(PresenceEvent::Activated)
            }
            PresenceSignal::Empty => {
                if self.state.active && self.empty_frames == EmptyFramePolicy::Refresh {
                    self.timer.arm(now, self.state.timeout);
                }
                None
            }
        }
    }

    pub fn on_timer(&mut self, token: TimerToken, now: Instant) -> TimerOutcome {
        match self.timer.fire(token, now) {
            Expiry::Stale => TimerOutcome::Stale,
            Expiry::Early => TimerOutcome::NotYetDue,
            Expiry::Fired if !self.state.active => TimerOutcome::Idle,
            Expiry::Fired => {
                self.state.active = false;
                self.timer.disarm();
                TimerOutcome::Transition(PresenceEvent::Deactivated {
                    timeout: self.state.timeout,
                })
            }
        }
    }
}
