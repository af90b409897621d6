//! ExamGate - Periodic Re-verification Scheduler
//!
//! Once an exam session is Active, a successful verification is required
//! every fixed interval. The scheduler is a cooperative, tick-driven
//! deadline core: the exam UI's event loop calls [`ReverifyScheduler::tick`]
//! and acts on what comes back. It never fires a second prompt while one is
//! outstanding, and a prompt left unanswered for a full further interval
//! expires the window and blocks the session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

/// Interval bounds accepted from the admin settings endpoint (minutes)
pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 60;

/// Admin-configured exam settings, fetched from the settings endpoint.
/// Not owned by this core - validated here, decided elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSettings {
    #[serde(rename = "faceVerificationIntervalMinutes")]
    pub face_verification_interval_minutes: u32,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            face_verification_interval_minutes: 15,
        }
    }
}

impl ExamSettings {
    /// Validate the configured interval into a duration
    pub fn interval(&self) -> GateResult<Duration> {
        let minutes = self.face_verification_interval_minutes;
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
            return Err(GateError::InvalidInterval(minutes));
        }
        Ok(Duration::minutes(minutes as i64))
    }
}

/// What the exam UI must do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Nothing due
    Idle,
    /// Suspend answer submission and show the verification prompt
    Prompt,
    /// The window expired without a successful verification - block the
    /// session
    Block,
}

/// Internal phase of the deadline cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Counting down to the next deadline
    Counting,
    /// A prompt is outstanding; no further prompts fire
    PromptPending,
    /// Window expired or verification failed; waiting for a successful
    /// verification to restart the cycle
    Expired,
    /// Torn down on exam submit; never fires again
    Cancelled,
}

/// Deadline core for periodic re-verification
#[derive(Debug)]
pub struct ReverifyScheduler {
    interval: Duration,
    next_due: DateTime<Utc>,
    phase: Phase,
}

impl ReverifyScheduler {
    /// Start the cycle at `now`; the first prompt is due one interval later
    pub fn start(now: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            interval,
            next_due: now + interval,
            phase: Phase::Counting,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next verification falls due
    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }

    pub fn is_prompt_pending(&self) -> bool {
        self.phase == Phase::PromptPending
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == Phase::Cancelled
    }

    /// Cooperative tick. Call from the exam UI event loop with the current
    /// time; re-entrant ticks while a prompt is outstanding return `Idle`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> SchedulerAction {
        match self.phase {
            Phase::Cancelled | Phase::Expired => SchedulerAction::Idle,
            Phase::Counting => {
                if now < self.next_due {
                    SchedulerAction::Idle
                } else {
                    self.phase = Phase::PromptPending;
                    SchedulerAction::Prompt
                }
            }
            Phase::PromptPending => {
                if now >= self.next_due + self.interval {
                    self.phase = Phase::Expired;
                    SchedulerAction::Block
                } else {
                    SchedulerAction::Idle
                }
            }
        }
    }

    /// A verification attempt succeeded: the deadline resets to a full
    /// interval from `now` and the exam resumes where it left off
    pub fn verification_succeeded(&mut self, now: DateTime<Utc>) {
        if self.phase == Phase::Cancelled {
            return;
        }
        self.phase = Phase::Counting;
        self.next_due = now + self.interval;
    }

    /// A verification attempt failed: the session is blocked by the caller
    /// and no further actions fire until a success restarts the cycle
    pub fn verification_failed(&mut self) {
        if self.phase == Phase::Cancelled {
            return;
        }
        self.phase = Phase::Expired;
    }

    /// Tear down on exam submit; no further prompts fire
    pub fn cancel(&mut self) {
        self.phase = Phase::Cancelled;
    }
}
