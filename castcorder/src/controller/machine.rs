//! The per-channel recording state machine.
//!
//! `StateMachine::step` is a pure function of (state, event, now) producing
//! the next state and exactly one [`Effect`]. The driver in the parent module
//! performs the effect and feeds the result back as the next [`Event`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::RunOutcome;
use super::retry::{RetryPolicy, RetryState};
use crate::capture::AttemptOutcome;
use crate::resolver::{LiveStatus, ResolvedEndpoint};
use crate::validator::Validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Checking,
    Capturing,
    Validating,
    Done,
    Retrying,
    Aborted,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Capturing => "capturing",
            Self::Validating => "validating",
            Self::Done => "done",
            Self::Retrying => "retrying",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Status(LiveStatus),
    Captured(AttemptOutcome),
    Validated(Validation),
    HandedOff,
    DelayElapsed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Resolve,
    Capture(ResolvedEndpoint),
    Validate(PathBuf),
    Handoff {
        endpoint: ResolvedEndpoint,
        path: PathBuf,
        duration: Duration,
    },
    /// Wait, then report `DelayElapsed` (or `Cancelled`).
    Sleep(Duration),
    /// Dispose of the failed attempt's file, then wait.
    Retry {
        discard: Option<PathBuf>,
        delay: Duration,
    },
    /// Dispose of the failed attempt's file, then stop.
    Abandon {
        discard: Option<PathBuf>,
        failures: u32,
    },
    Finish(RunOutcome),
}

pub struct StateMachine {
    channel: String,
    state: State,
    policy: RetryPolicy,
    retry: RetryState,
    stop_after_success: bool,
    endpoint: Option<ResolvedEndpoint>,
    /// Recording waiting for the validator's verdict.
    pending: Option<(PathBuf, Duration)>,
    handoffs: u32,
}

impl StateMachine {
    pub fn new(channel: impl Into<String>, policy: RetryPolicy, stop_after_success: bool) -> Self {
        Self {
            channel: channel.into(),
            state: State::Idle,
            policy,
            retry: RetryState::default(),
            stop_after_success,
            endpoint: None,
            pending: None,
            handoffs: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Number of recordings handed off so far.
    pub fn handoffs(&self) -> u32 {
        self.handoffs
    }

    pub fn step(&mut self, event: Event, now: Instant) -> Effect {
        let from = self.state;
        let effect = self.transition(event, now);
        if from != self.state {
            debug!(channel = %self.channel, from = %from, to = %self.state, "State transition");
        }
        effect
    }

    fn transition(&mut self, event: Event, now: Instant) -> Effect {
        match (self.state, event) {
            (State::Aborted, _) => Effect::Finish(RunOutcome::Cancelled),
            (_, Event::Cancelled) => {
                self.state = State::Aborted;
                Effect::Finish(RunOutcome::Cancelled)
            }

            (State::Idle, Event::Start | Event::DelayElapsed)
            | (State::Retrying, Event::DelayElapsed) => {
                self.state = State::Checking;
                Effect::Resolve
            }

            (State::Checking, Event::Status(status)) => self.on_status(status, now),
            (State::Capturing, Event::Captured(outcome)) => self.on_captured(outcome, now),
            (State::Validating, Event::Validated(verdict)) => self.on_validated(verdict, now),

            (State::Done, Event::HandedOff) => {
                self.handoffs += 1;
                if self.stop_after_success {
                    self.state = State::Aborted;
                    return Effect::Finish(RunOutcome::Completed);
                }
                self.state = State::Idle;
                Effect::Sleep(self.policy.retry_delay)
            }

            (state, event) => {
                let reason = format!("unexpected {event:?} while {state}");
                warn!(channel = %self.channel, "{}", reason);
                self.state = State::Aborted;
                Effect::Finish(RunOutcome::Failed(reason))
            }
        }
    }

    fn on_status(&mut self, status: LiveStatus, now: Instant) -> Effect {
        match status {
            LiveStatus::Live(endpoint) if endpoint.is_actionable() => {
                info!(
                    channel = %self.channel,
                    title = %endpoint.title,
                    stream_id = %endpoint.stream_id,
                    "Channel is live"
                );
                self.retry.record_attempt(now);
                self.endpoint = Some(endpoint.clone());
                self.state = State::Capturing;
                Effect::Capture(endpoint)
            }
            LiveStatus::Live(_) => {
                warn!(channel = %self.channel, "Live status without a capture URL");
                self.idle()
            }
            LiveStatus::Offline => {
                debug!(channel = %self.channel, "Channel offline");
                self.idle()
            }
            LiveStatus::TransientError(reason) => {
                warn!(channel = %self.channel, "Liveness check failed: {}", reason);
                self.idle()
            }
            LiveStatus::AuthRequired => {
                warn!(
                    channel = %self.channel,
                    "Broadcast requires a password; set PRIVATE_STREAM_PASSWORD"
                );
                self.state = State::Aborted;
                Effect::Finish(RunOutcome::AuthRequired)
            }
        }
    }

    fn on_captured(&mut self, outcome: AttemptOutcome, now: Instant) -> Effect {
        if outcome == AttemptOutcome::UserCancelled {
            info!(channel = %self.channel, "Capture cancelled");
            self.state = State::Aborted;
            return Effect::Finish(RunOutcome::Cancelled);
        }

        self.state = State::Validating;
        match outcome {
            AttemptOutcome::Success { path, duration } => {
                self.pending = Some((path.clone(), duration));
                Effect::Validate(path)
            }
            AttemptOutcome::StalledTimeout { path, last_size } => {
                warn!(channel = %self.channel, last_size, "Capture stalled");
                self.fail(path, now)
            }
            other => {
                warn!(channel = %self.channel, outcome = other.label(), "Capture attempt failed");
                let discard = other.path().map(PathBuf::from);
                self.fail(discard, now)
            }
        }
    }

    fn on_validated(&mut self, verdict: Validation, now: Instant) -> Effect {
        let pending = self.pending.take();
        match (verdict, pending, self.endpoint.clone()) {
            (Validation::Usable { duration }, Some((path, wall)), Some(endpoint)) => {
                info!(
                    channel = %self.channel,
                    path = %path.display(),
                    duration = ?duration.unwrap_or(wall),
                    "Recording is usable"
                );
                self.retry.reset();
                self.state = State::Done;
                Effect::Handoff {
                    endpoint,
                    path,
                    duration: duration.unwrap_or(wall),
                }
            }
            (verdict, pending, _) => {
                warn!(channel = %self.channel, verdict = ?verdict, "Recording rejected");
                self.fail(pending.map(|(path, _)| path), now)
            }
        }
    }

    fn fail(&mut self, discard: Option<PathBuf>, now: Instant) -> Effect {
        let failures = self.retry.record_failure(now);
        if self.policy.exhausted(&self.retry, now) {
            warn!(channel = %self.channel, failures, "Giving up after repeated failures");
            self.state = State::Aborted;
            return Effect::Abandon { discard, failures };
        }

        let delay = self.policy.delay_for_failure(failures);
        info!(channel = %self.channel, failures, delay = ?delay, "Retrying after failure");
        self.state = State::Retrying;
        Effect::Retry { discard, delay }
    }

    fn idle(&mut self) -> Effect {
        self.state = State::Idle;
        Effect::Sleep(self.policy.check_interval)
    }
}
