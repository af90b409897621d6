//! ExamGate - Verification Attempts and Exam Session State
//!
//! Two state machines live here: the per-attempt lifecycle recorded for the
//! audit trail, and the exam session itself. Session transitions are guarded
//! methods - an Active session whose re-verification window has expired can
//! only become Active again by passing through Blocked.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GateError, GateResult};

// ═══════════════════════════════════════════════════════════════════════════
// VERIFICATION ATTEMPTS
// ═══════════════════════════════════════════════════════════════════════════

/// Why a verification attempt failed. Surfaced distinctly so the UI can
/// advise the user; all reasons are recoverable by retrying from capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No face could be localized in the captured frame
    NoFaceDetected,
    /// The descriptor did not match the enrolled identity
    Mismatch,
    /// The submission never reached the server
    NetworkError,
    /// The server failed or rejected the submission outright
    ServerError,
}

impl FailureReason {
    /// User-facing advice. Network and server failures are distinguished
    /// internally for logging only - the user sees one generic retry prompt,
    /// and a mismatch never reveals which descriptor differed.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::NoFaceDetected => {
                "No face detected - adjust lighting and framing, then try again"
            }
            FailureReason::Mismatch => "Verification failed - please try again",
            FailureReason::NetworkError | FailureReason::ServerError => {
                "Could not reach the verification service - please try again"
            }
        }
    }

    /// Only identity rejections count toward the lockout; a missing face or
    /// a dead network says nothing about who is in front of the camera.
    pub fn counts_toward_lockout(&self) -> bool {
        matches!(self, FailureReason::Mismatch)
    }
}

/// Per-attempt lifecycle: Idle -> Capturing -> Extracting -> Submitting ->
/// Verified | Failed. Nothing is cached across attempts; every retry is a
/// fresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Capturing,
    Extracting,
    Submitting,
    Verified,
    Failed(FailureReason),
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Verified | AttemptState::Failed(_))
    }
}

/// Resolution of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptResult {
    Pending,
    Verified,
    Failed(FailureReason),
}

/// Audit record of one verification attempt. Immutable once resolved. The
/// captured descriptor is deliberately absent - it is discarded after
/// comparison and only the outcome survives the attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationAttempt {
    pub attempt_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub result: AttemptResult,
}

impl VerificationAttempt {
    pub fn resolved(captured_at: DateTime<Utc>, result: AttemptResult) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            captured_at,
            result,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCKOUT POLICY
// ═══════════════════════════════════════════════════════════════════════════

/// Lockout policy for consecutive identity rejections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Consecutive mismatches before the controller refuses new attempts
    pub max_consecutive_mismatches: u8,
    /// Cooldown after lockout (seconds)
    pub cooldown_seconds: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_mismatches: 5,
            cooldown_seconds: 300,
        }
    }
}

/// Mutable lockout bookkeeping
#[derive(Debug, Clone, Default)]
pub struct LockoutState {
    consecutive_mismatches: u8,
    locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Check if attempts are currently refused
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        match self.locked_until {
            Some(until) => now < until,
            None => false,
        }
    }

    /// Record a failed attempt; engages the lockout when the policy limit
    /// is reached
    pub fn record_failure(
        &mut self,
        reason: FailureReason,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) {
        if !reason.counts_toward_lockout() {
            return;
        }

        self.consecutive_mismatches = self.consecutive_mismatches.saturating_add(1);
        if self.consecutive_mismatches >= policy.max_consecutive_mismatches {
            self.locked_until = Some(now + Duration::seconds(policy.cooldown_seconds as i64));
            log::warn!(
                "verification locked after {} consecutive mismatches",
                self.consecutive_mismatches
            );
        }
    }

    /// Reset the counter after a successful verification
    pub fn record_success(&mut self) {
        self.consecutive_mismatches = 0;
        self.locked_until = None;
    }

    /// Attempts left before lockout
    pub fn remaining_attempts(&self, policy: &LockoutPolicy) -> u8 {
        policy
            .max_consecutive_mismatches
            .saturating_sub(self.consecutive_mismatches)
    }

    /// Remaining cooldown (seconds), if locked
    pub fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.locked_until
            .filter(|until| now < *until)
            .map(|until| (until - now).num_seconds().max(0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// EXAM SESSION
// ═══════════════════════════════════════════════════════════════════════════

/// Exam session status. Drives what the exam UI may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    NotStarted,
    AwaitingVerification,
    Active,
    Blocked,
    Submitted,
}

/// One learner's exam session for the duration of the exam
#[derive(Debug, Clone)]
pub struct ExamSession {
    pub session_id: Uuid,
    pub learner_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub last_verified_at: Option<DateTime<Utc>>,
    status: SessionStatus,
}

impl ExamSession {
    pub fn new(learner_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            learner_id: learner_id.into(),
            started_at: None,
            last_verified_at: None,
            status: SessionStatus::NotStarted,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Answers may only be submitted while Active
    pub fn may_submit_answers(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whether the re-verification window has lapsed
    pub fn window_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_verified_at {
            Some(at) => now > at + window,
            None => true,
        }
    }

    /// Enter the exam room: NotStarted -> AwaitingVerification
    pub fn begin(&mut self, now: DateTime<Utc>) -> GateResult<()> {
        if self.status != SessionStatus::NotStarted {
            return Err(self.invalid("begin"));
        }
        self.started_at = Some(now);
        self.status = SessionStatus::AwaitingVerification;
        Ok(())
    }

    /// Entry verification succeeded: AwaitingVerification -> Active
    pub fn entry_verified(&mut self, now: DateTime<Utc>) -> GateResult<()> {
        if self.status != SessionStatus::AwaitingVerification {
            return Err(self.invalid("entry_verified"));
        }
        self.last_verified_at = Some(now);
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Re-verification succeeded: Active -> Active within the window, or
    /// Blocked -> Active. An Active session whose window has already expired
    /// must transition through Blocked first.
    pub fn reverified(&mut self, now: DateTime<Utc>, window: Duration) -> GateResult<()> {
        match self.status {
            SessionStatus::Active => {
                if self.window_expired(now, window) {
                    return Err(GateError::InvalidTransition(
                        "re-verification window expired; session must block first".into(),
                    ));
                }
                self.last_verified_at = Some(now);
                Ok(())
            }
            SessionStatus::Blocked => {
                self.last_verified_at = Some(now);
                self.status = SessionStatus::Active;
                Ok(())
            }
            _ => Err(self.invalid("reverified")),
        }
    }

    /// Re-verification failed or window expired: Active -> Blocked
    pub fn block(&mut self) -> GateResult<()> {
        if self.status != SessionStatus::Active {
            return Err(self.invalid("block"));
        }
        self.status = SessionStatus::Blocked;
        Ok(())
    }

    /// Learner submits the exam: Active -> Submitted
    pub fn submit(&mut self) -> GateResult<()> {
        if self.status != SessionStatus::Active {
            return Err(self.invalid("submit"));
        }
        self.status = SessionStatus::Submitted;
        Ok(())
    }

    fn invalid(&self, transition: &str) -> GateError {
        GateError::InvalidTransition(format!("{} from {:?}", transition, self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: i64) -> Duration {
        Duration::minutes(m)
    }

    #[test]
    fn test_entry_flow() {
        let now = Utc::now();
        let mut session = ExamSession::new("learner-1");
        assert_eq!(session.status(), SessionStatus::NotStarted);
        assert!(!session.may_submit_answers());

        session.begin(now).unwrap();
        assert_eq!(session.status(), SessionStatus::AwaitingVerification);

        session.entry_verified(now).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.may_submit_answers());
        assert_eq!(session.last_verified_at, Some(now));
    }

    #[test]
    fn test_entry_verified_requires_awaiting() {
        let mut session = ExamSession::new("learner-1");
        assert!(matches!(
            session.entry_verified(Utc::now()),
            Err(GateError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_reverify_within_window_stays_active() {
        let now = Utc::now();
        let mut session = ExamSession::new("learner-1");
        session.begin(now).unwrap();
        session.entry_verified(now).unwrap();

        let later = now + minutes(10);
        session.reverified(later, minutes(15)).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.last_verified_at, Some(later));
    }

    #[test]
    fn test_expired_window_must_pass_through_blocked() {
        let now = Utc::now();
        let mut session = ExamSession::new("learner-1");
        session.begin(now).unwrap();
        session.entry_verified(now).unwrap();

        // window lapsed: Active -> Active is refused
        let late = now + minutes(20);
        assert!(matches!(
            session.reverified(late, minutes(15)),
            Err(GateError::InvalidTransition(_))
        ));
        assert_eq!(session.status(), SessionStatus::Active);

        // the legal path goes through Blocked
        session.block().unwrap();
        session.reverified(late, minutes(15)).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn test_blocked_session_cannot_submit() {
        let now = Utc::now();
        let mut session = ExamSession::new("learner-1");
        session.begin(now).unwrap();
        session.entry_verified(now).unwrap();
        session.block().unwrap();

        assert!(!session.may_submit_answers());
        assert!(matches!(
            session.submit(),
            Err(GateError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_submit_ends_session() {
        let now = Utc::now();
        let mut session = ExamSession::new("learner-1");
        session.begin(now).unwrap();
        session.entry_verified(now).unwrap();
        session.submit().unwrap();
        assert_eq!(session.status(), SessionStatus::Submitted);

        // no transitions out of Submitted
        assert!(session.block().is_err());
        assert!(session.reverified(now, minutes(15)).is_err());
    }

    #[test]
    fn test_lockout_counts_only_mismatches() {
        let now = Utc::now();
        let policy = LockoutPolicy::default();
        let mut lockout = LockoutState::default();

        lockout.record_failure(FailureReason::NoFaceDetected, now, &policy);
        lockout.record_failure(FailureReason::NetworkError, now, &policy);
        lockout.record_failure(FailureReason::ServerError, now, &policy);
        assert_eq!(lockout.remaining_attempts(&policy), 5);

        lockout.record_failure(FailureReason::Mismatch, now, &policy);
        assert_eq!(lockout.remaining_attempts(&policy), 4);
        assert!(!lockout.is_locked(now));
    }

    #[test]
    fn test_lockout_engages_and_expires() {
        let now = Utc::now();
        let policy = LockoutPolicy {
            max_consecutive_mismatches: 3,
            cooldown_seconds: 300,
        };
        let mut lockout = LockoutState::default();

        for _ in 0..3 {
            lockout.record_failure(FailureReason::Mismatch, now, &policy);
        }
        assert!(lockout.is_locked(now));
        assert_eq!(lockout.lockout_remaining(now), Some(300));

        // cooldown elapses
        let later = now + Duration::seconds(301);
        assert!(!lockout.is_locked(later));
        assert_eq!(lockout.lockout_remaining(later), None);
    }

    #[test]
    fn test_success_resets_lockout() {
        let now = Utc::now();
        let policy = LockoutPolicy {
            max_consecutive_mismatches: 2,
            cooldown_seconds: 300,
        };
        let mut lockout = LockoutState::default();

        lockout.record_failure(FailureReason::Mismatch, now, &policy);
        lockout.record_success();
        lockout.record_failure(FailureReason::Mismatch, now, &policy);
        assert!(!lockout.is_locked(now));
    }

    #[test]
    fn test_failure_reason_messages_do_not_leak_internals() {
        // network and server failures are indistinguishable to the user
        assert_eq!(
            FailureReason::NetworkError.user_message(),
            FailureReason::ServerError.user_message()
        );
        assert!(!FailureReason::Mismatch.user_message().contains("descriptor"));
    }
}
