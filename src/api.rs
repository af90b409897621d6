//! ExamGate - Unified Exam-Room API
//!
//! Single entry point wiring the eligibility gate, the exam session, the
//! verification controller and the re-verification scheduler together.
//!
//! The exam UI's cooperative event loop drives this object: it calls
//! [`ExamGate::poll`] with the current time and acts on the returned
//! [`SchedulerAction`]. All locks are short-scoped and never held across an
//! await.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::camera::FrameSource;
use crate::controller::{AbandonHandle, AttemptOutcome, VerificationController, VerifyBackend};
use crate::eligibility::EligibilityResult;
use crate::error::{GateError, GateResult};
use crate::extractor::FaceExtractor;
use crate::scheduler::{ExamSettings, ReverifyScheduler, SchedulerAction};
use crate::session::{ExamSession, LockoutPolicy, SessionStatus, VerificationAttempt};

/// Exam-room facade for one learner's session
pub struct ExamGate<B: VerifyBackend> {
    controller: VerificationController<B>,
    settings: ExamSettings,
    interval: Duration,
    session: RwLock<ExamSession>,
    scheduler: RwLock<Option<ReverifyScheduler>>,
}

/// Point-in-time view of the gate, for status displays
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub session_id: Uuid,
    pub learner_id: String,
    pub status: SessionStatus,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub next_reverification_due: Option<DateTime<Utc>>,
    pub prompt_pending: bool,
    pub attempts_recorded: usize,
    pub remaining_attempts: u8,
}

impl<B: VerifyBackend> ExamGate<B> {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a gate for a learner with the default lockout policy.
    /// Fails if the configured re-verification interval is out of range.
    pub fn new(
        learner_id: impl Into<String>,
        extractor: FaceExtractor,
        backend: B,
        settings: ExamSettings,
    ) -> GateResult<Self> {
        Self::with_policy(learner_id, extractor, backend, settings, LockoutPolicy::default())
    }

    /// Create a gate with a custom lockout policy
    pub fn with_policy(
        learner_id: impl Into<String>,
        extractor: FaceExtractor,
        backend: B,
        settings: ExamSettings,
        policy: LockoutPolicy,
    ) -> GateResult<Self> {
        let interval = settings.interval()?;
        Ok(Self {
            controller: VerificationController::with_policy(extractor, backend, policy),
            settings,
            interval,
            session: RwLock::new(ExamSession::new(learner_id)),
            scheduler: RwLock::new(None),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENTRY
    // ═══════════════════════════════════════════════════════════════════════

    /// Enter the exam room. Eligibility gates the whole flow - an
    /// ineligible (or failed-closed) result never reaches verification.
    pub fn begin(&self, eligibility: &EligibilityResult) -> GateResult<()> {
        if !eligibility.exam_eligible {
            return Err(GateError::NotEligible);
        }
        self.session.write().begin(Utc::now())
    }

    /// Run the entry verification. On success the session becomes Active
    /// and the re-verification cycle starts.
    pub async fn verify_entry<S: FrameSource>(&self, source: S) -> GateResult<AttemptOutcome> {
        {
            let session = self.session.read();
            if session.status() != SessionStatus::AwaitingVerification {
                return Err(GateError::InvalidTransition(format!(
                    "entry verification from {:?}",
                    session.status()
                )));
            }
        }

        let outcome = self.controller.run_attempt(source).await?;

        if outcome == AttemptOutcome::Verified {
            let now = Utc::now();
            self.session.write().entry_verified(now)?;
            *self.scheduler.write() = Some(ReverifyScheduler::start(now, self.interval));
            log::info!(
                "exam session active; re-verification every {} min",
                self.settings.face_verification_interval_minutes
            );
        }
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RE-VERIFICATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Run a mid-exam re-verification. Success resumes the exam exactly
    /// where it left off; failure blocks answer submission until a retry
    /// succeeds.
    pub async fn reverify<S: FrameSource>(&self, source: S) -> GateResult<AttemptOutcome> {
        {
            let session = self.session.read();
            if !matches!(
                session.status(),
                SessionStatus::Active | SessionStatus::Blocked
            ) {
                return Err(GateError::InvalidTransition(format!(
                    "re-verification from {:?}",
                    session.status()
                )));
            }
        }

        let outcome = self.controller.run_attempt(source).await?;
        let now = Utc::now();

        match outcome {
            AttemptOutcome::Verified => {
                {
                    let mut session = self.session.write();
                    if session.status() == SessionStatus::Active
                        && session.window_expired(now, self.interval)
                    {
                        // the window lapsed mid-attempt; surface the Blocked
                        // hop before resuming
                        session.block()?;
                    }
                    session.reverified(now, self.interval)?;
                }
                if let Some(scheduler) = self.scheduler.write().as_mut() {
                    scheduler.verification_succeeded(now);
                }
            }
            AttemptOutcome::Failed(reason) => {
                {
                    let mut session = self.session.write();
                    if session.status() == SessionStatus::Active {
                        session.block()?;
                        log::warn!("re-verification failed ({:?}); session blocked", reason);
                    }
                }
                if let Some(scheduler) = self.scheduler.write().as_mut() {
                    scheduler.verification_failed();
                }
            }
            AttemptOutcome::Discarded => {}
        }
        Ok(outcome)
    }

    /// Cooperative tick from the exam UI loop. Returns what the UI must do;
    /// a `Block` has already been applied to the session.
    pub fn poll(&self, now: DateTime<Utc>) -> SchedulerAction {
        let action = match self.scheduler.write().as_mut() {
            Some(scheduler) => scheduler.tick(now),
            None => SchedulerAction::Idle,
        };

        if action == SchedulerAction::Block {
            let mut session = self.session.write();
            if session.status() == SessionStatus::Active {
                if session.block().is_ok() {
                    log::warn!("re-verification window expired; session blocked");
                }
            }
        }
        action
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SUBMISSION / TEARDOWN
    // ═══════════════════════════════════════════════════════════════════════

    /// Answers may only go out while Active and with no verification
    /// prompt outstanding
    pub fn may_submit_answers(&self) -> bool {
        let prompt_pending = self
            .scheduler
            .read()
            .as_ref()
            .map(|s| s.is_prompt_pending())
            .unwrap_or(false);
        self.session.read().may_submit_answers() && !prompt_pending
    }

    /// Learner submits the exam; the scheduler is torn down immediately and
    /// no further prompts fire
    pub fn submit_exam(&self) -> GateResult<()> {
        self.session.write().submit()?;
        {
            let mut scheduler = self.scheduler.write();
            if let Some(s) = scheduler.as_mut() {
                s.cancel();
            }
            *scheduler = None;
        }
        log::info!("exam submitted; re-verification torn down");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATUS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn status(&self) -> SessionStatus {
        self.session.read().status()
    }

    /// Handle for the capture-modal close path
    pub fn abandon_capture(&self) -> AbandonHandle {
        self.controller.abandon_handle()
    }

    /// Audit trail of resolved attempts
    pub fn attempts(&self) -> Vec<VerificationAttempt> {
        self.controller.attempts()
    }

    /// When the next re-verification falls due, while the cycle is running
    pub fn next_reverification_due(&self) -> Option<DateTime<Utc>> {
        self.scheduler.read().as_ref().map(|s| s.next_due())
    }

    /// Point-in-time snapshot for status displays
    pub fn snapshot(&self) -> GateStatus {
        let session = self.session.read();
        let scheduler = self.scheduler.read();

        GateStatus {
            session_id: session.session_id,
            learner_id: session.learner_id.clone(),
            status: session.status(),
            last_verified_at: session.last_verified_at,
            next_reverification_due: scheduler.as_ref().map(|s| s.next_due()),
            prompt_pending: scheduler.as_ref().map(|s| s.is_prompt_pending()).unwrap_or(false),
            attempts_recorded: self.controller.attempts().len(),
            remaining_attempts: self.controller.remaining_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StillImage;
    use crate::controller::VerifyVerdict;
    use crate::descriptor::FaceDescriptor;
    use crate::eligibility::{CourseProgress, CourseStatus};
    use crate::extractor::{fixtures, EmbeddingModel};
    use crate::session::FailureReason;
    use std::future::Future;
    use std::sync::Arc;

    struct AcceptBackend;

    impl VerifyBackend for AcceptBackend {
        fn verify(
            &self,
            _descriptor: &FaceDescriptor,
        ) -> impl Future<Output = GateResult<VerifyVerdict>> + Send {
            async move { Ok(VerifyVerdict { success: true, message: None }) }
        }
    }

    struct RejectBackend;

    impl VerifyBackend for RejectBackend {
        fn verify(
            &self,
            _descriptor: &FaceDescriptor,
        ) -> impl Future<Output = GateResult<VerifyVerdict>> + Send {
            async move {
                Ok(VerifyVerdict {
                    success: false,
                    message: Some("mismatch".into()),
                })
            }
        }
    }

    /// Backend that follows a fixed verdict sequence, then accepts
    struct SequenceBackend {
        verdicts: Vec<bool>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl SequenceBackend {
        fn new(verdicts: impl Into<Vec<bool>>) -> Self {
            Self {
                verdicts: verdicts.into(),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl VerifyBackend for SequenceBackend {
        fn verify(
            &self,
            _descriptor: &FaceDescriptor,
        ) -> impl Future<Output = GateResult<VerifyVerdict>> + Send {
            async move {
                let call = self
                    .calls
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let success = self.verdicts.get(call).copied().unwrap_or(true);
                Ok(VerifyVerdict { success, message: None })
            }
        }
    }

    fn extractor() -> FaceExtractor {
        FaceExtractor::new(Arc::new(EmbeddingModel::synthetic(42)))
    }

    fn eligible() -> EligibilityResult {
        crate::eligibility::evaluate(&[CourseProgress {
            course_id: "c-1".into(),
            course_name: "Course".into(),
            completion_rate: 100,
            status: CourseStatus::Completed,
        }])
    }

    fn gate<B: VerifyBackend>(backend: B) -> ExamGate<B> {
        ExamGate::new("learner-1", extractor(), backend, ExamSettings::default()).unwrap()
    }

    #[test]
    fn test_invalid_interval_is_rejected_up_front() {
        let settings = ExamSettings {
            face_verification_interval_minutes: 0,
        };
        let result = ExamGate::new("learner-1", extractor(), AcceptBackend, settings);
        assert!(matches!(result, Err(GateError::InvalidInterval(0))));
    }

    #[test]
    fn test_ineligible_learner_cannot_begin() {
        let gate = gate(AcceptBackend);
        let ineligible = crate::eligibility::evaluate(&[]);
        assert!(matches!(gate.begin(&ineligible), Err(GateError::NotEligible)));
        assert_eq!(gate.status(), SessionStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_entry_flow_no_face_then_verified() {
        let gate = gate(AcceptBackend);
        gate.begin(&eligible()).unwrap();
        assert_eq!(gate.status(), SessionStatus::AwaitingVerification);

        // first capture finds no face; the session stays gated
        let first = gate
            .verify_entry(StillImage::new(fixtures::blank_png()))
            .await
            .unwrap();
        assert_eq!(first, AttemptOutcome::Failed(FailureReason::NoFaceDetected));
        assert_eq!(gate.status(), SessionStatus::AwaitingVerification);

        // retry with a valid face activates the session
        let second = gate
            .verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        assert_eq!(second, AttemptOutcome::Verified);
        assert_eq!(gate.status(), SessionStatus::Active);
        assert!(gate.may_submit_answers());
        assert!(gate.next_reverification_due().is_some());
        assert_eq!(gate.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_prompt_suspends_answers_and_success_resumes() {
        let gate = gate(AcceptBackend);
        gate.begin(&eligible()).unwrap();
        gate.verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();

        let due = gate.next_reverification_due().unwrap();
        assert_eq!(gate.poll(due - Duration::seconds(1)), SchedulerAction::Idle);
        assert_eq!(gate.poll(due), SchedulerAction::Prompt);
        // prompt outstanding: answers suspended, no second prompt
        assert!(!gate.may_submit_answers());
        assert_eq!(gate.poll(due + Duration::seconds(30)), SchedulerAction::Idle);

        let outcome = gate
            .reverify(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Verified);
        assert_eq!(gate.status(), SessionStatus::Active);
        assert!(gate.may_submit_answers());
    }

    #[tokio::test]
    async fn test_rejected_entry_keeps_session_gated() {
        let gate = gate(RejectBackend);
        gate.begin(&eligible()).unwrap();
        let result = gate
            .verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        assert_eq!(result, AttemptOutcome::Failed(FailureReason::Mismatch));
        assert_eq!(gate.status(), SessionStatus::AwaitingVerification);
    }

    #[tokio::test]
    async fn test_failed_reverification_blocks_until_retry_succeeds() {
        // verdict sequence: entry accepted, first re-verify rejected,
        // second re-verify accepted
        let gate = gate(SequenceBackend::new([true, false, true]));
        gate.begin(&eligible()).unwrap();
        gate.verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();

        let due = gate.next_reverification_due().unwrap();
        assert_eq!(gate.poll(due), SchedulerAction::Prompt);

        let failed = gate
            .reverify(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        assert_eq!(failed, AttemptOutcome::Failed(FailureReason::Mismatch));
        assert_eq!(gate.status(), SessionStatus::Blocked);
        assert!(!gate.may_submit_answers());
        // no prompt spam while blocked
        assert_eq!(gate.poll(due + Duration::minutes(1)), SchedulerAction::Idle);

        let retried = gate
            .reverify(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        assert_eq!(retried, AttemptOutcome::Verified);
        assert_eq!(gate.status(), SessionStatus::Active);
        assert!(gate.may_submit_answers());
    }

    #[tokio::test]
    async fn test_expired_prompt_blocks_session() {
        let gate = gate(AcceptBackend);
        gate.begin(&eligible()).unwrap();
        gate.verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();

        let due = gate.next_reverification_due().unwrap();
        assert_eq!(gate.poll(due), SchedulerAction::Prompt);
        // the prompt is ignored for a full further interval
        let expired = due + Duration::minutes(15);
        assert_eq!(gate.poll(expired), SchedulerAction::Block);
        assert_eq!(gate.status(), SessionStatus::Blocked);
        assert!(!gate.may_submit_answers());

        // a successful retry reactivates the session
        let outcome = gate
            .reverify(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Verified);
        assert_eq!(gate.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_submit_tears_down_the_scheduler() {
        let gate = gate(AcceptBackend);
        gate.begin(&eligible()).unwrap();
        gate.verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();
        let due = gate.next_reverification_due().unwrap();

        gate.submit_exam().unwrap();
        assert_eq!(gate.status(), SessionStatus::Submitted);
        assert!(gate.next_reverification_due().is_none());
        // no further prompts fire, ever
        assert_eq!(gate.poll(due + Duration::minutes(90)), SchedulerAction::Idle);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state() {
        let gate = gate(AcceptBackend);
        gate.begin(&eligible()).unwrap();
        gate.verify_entry(StillImage::new(fixtures::face_png()))
            .await
            .unwrap();

        let snapshot = gate.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.learner_id, "learner-1");
        assert!(snapshot.last_verified_at.is_some());
        assert!(snapshot.next_reverification_due.is_some());
        assert!(!snapshot.prompt_pending);
        assert_eq!(snapshot.attempts_recorded, 1);
    }
}
