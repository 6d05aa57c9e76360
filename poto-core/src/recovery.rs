//! Stall detection and recovery
//!
//! ```text
//! Normal ──trigger──► Resetting ──arm──► AwaitingResume ──poll(due)──► Normal
//!                        ▲                     │
//!                        └──── trigger ────────┘  (restarts the timer only)
//! ```
//!
//! The resume timer is a deadline checked from the UI thread. Each deadline
//! is tagged with the recovery epoch; `cancel` bumps the epoch, so a timer
//! armed before a stop or a new open can never fire.
//!
//! Attempts count consecutive resets. They are forgotten once a resumed
//! session plays on for one recovery delay past its resume point.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Normal,
    Resetting,
    AwaitingResume,
}

/// What set recovery off
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallTrigger {
    SeekMismatch { target_ms: u64, reported_ms: u64 },
    PipelineError(String),
}

impl fmt::Display for StallTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeekMismatch {
                target_ms,
                reported_ms,
            } => write!(f, "seek to {target_ms}ms reported {reported_ms}ms"),
            Self::PipelineError(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Reset the pipeline now, then `arm`
    Reset,
    /// Already recovering; the resume was pushed back
    Debounced,
    /// Too many consecutive attempts
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct StallRecovery {
    delay: Duration,
    max_attempts: u32,
    phase: RecoveryPhase,
    attempts: u32,
    epoch: u64,
    deadline: Option<(u64, Instant)>,
    /// Position the last resume restarted from, until it proves healthy
    resumed_from: Option<u64>,
}

impl StallRecovery {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            phase: RecoveryPhase::Normal,
            attempts: 0,
            epoch: 0,
            deadline: None,
            resumed_from: None,
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != RecoveryPhase::Normal
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// When the armed resume falls due
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
            .filter(|(epoch, _)| *epoch == self.epoch)
            .map(|(_, at)| at)
    }

    pub fn trigger(&mut self, trigger: StallTrigger, now: Instant) -> TriggerOutcome {
        tracing::debug!("Stall trigger in {:?}: {}", self.phase, trigger);
        self.resumed_from = None;

        match self.phase {
            RecoveryPhase::Normal if self.attempts >= self.max_attempts => {
                self.deadline = None;
                TriggerOutcome::Exhausted
            }
            RecoveryPhase::Normal => {
                self.attempts += 1;
                self.phase = RecoveryPhase::Resetting;
                TriggerOutcome::Reset
            }
            RecoveryPhase::Resetting | RecoveryPhase::AwaitingResume => {
                self.deadline = Some((self.epoch, now + self.delay));
                TriggerOutcome::Debounced
            }
        }
    }

    /// Start the one-shot resume timer after a reset.
    pub fn arm(&mut self, now: Instant) {
        self.phase = RecoveryPhase::AwaitingResume;
        self.deadline = Some((self.epoch, now + self.delay));
    }

    /// True exactly once when the armed resume is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.phase != RecoveryPhase::AwaitingResume {
            return false;
        }
        match self.deadline() {
            Some(at) if now >= at => {
                self.deadline = None;
                self.phase = RecoveryPhase::Normal;
                true
            }
            _ => false,
        }
    }

    /// Abandon any recovery in flight and forget past attempts.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        self.deadline = None;
        self.phase = RecoveryPhase::Normal;
        self.attempts = 0;
        self.resumed_from = None;
    }

    /// Playback verified healthy again.
    pub fn settle(&mut self) {
        self.attempts = 0;
        self.resumed_from = None;
    }

    /// The resumed session restarted from `position_ms`.
    pub fn resumed(&mut self, position_ms: u64) {
        self.resumed_from = Some(position_ms);
    }

    /// Feed a position report. Settles once the resumed session has played
    /// one recovery delay past its resume point; returns true when it does.
    pub fn observe(&mut self, position_ms: u64) -> bool {
        if self.phase != RecoveryPhase::Normal {
            return false;
        }
        let Some(start) = self.resumed_from else {
            return false;
        };
        let healthy_ms = self.delay.as_millis() as u64;
        if position_ms < start.saturating_add(healthy_ms) {
            return false;
        }
        tracing::debug!("Playback healthy at {}ms, clearing {} attempts", position_ms, self.attempts);
        self.settle();
        true
    }
}
