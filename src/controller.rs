//! ExamGate - Verification Session Controller
//!
//! Orchestrates one capture -> extract -> submit cycle and absorbs every
//! failure into attempt state; nothing escapes uncaught except conditions
//! that keep the capture UI from opening at all (lockout, a second capture
//! while one is in flight). Every retry is a fresh cycle - no attempt
//! result is cached across attempts.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::camera::{FrameSource, ScopedCapture};
use crate::descriptor::FaceDescriptor;
use crate::error::{GateError, GateResult};
use crate::extractor::{Extraction, FaceExtractor};
use crate::session::{
    AttemptResult, AttemptState, FailureReason, LockoutPolicy, LockoutState, VerificationAttempt,
};

/// Server verdict on a submitted descriptor
#[derive(Debug, Clone)]
pub struct VerifyVerdict {
    pub success: bool,
    pub message: Option<String>,
}

/// Server-side descriptor check, bearer-authenticated as the current
/// learner. Implemented by [`crate::client::BackendClient`] in production
/// and by fakes in tests.
pub trait VerifyBackend {
    fn verify(
        &self,
        descriptor: &FaceDescriptor,
    ) -> impl Future<Output = GateResult<VerifyVerdict>> + Send;
}

/// How one attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Verified,
    Failed(FailureReason),
    /// The capture modal was closed while the attempt was in flight; the
    /// in-flight work completed but its result was discarded and no state
    /// changed
    Discarded,
}

/// Handle for abandoning the in-flight attempt from the modal-close path
#[derive(Clone)]
pub struct AbandonHandle(Arc<AtomicBool>);

impl AbandonHandle {
    pub fn abandon(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Verification Session Controller
pub struct VerificationController<B: VerifyBackend> {
    backend: B,
    extractor: FaceExtractor,
    policy: LockoutPolicy,
    lockout: RwLock<LockoutState>,
    /// Current attempt stage, for the UI to render
    progress: RwLock<AttemptState>,
    /// Audit trail of resolved attempts for this session
    attempts: RwLock<Vec<VerificationAttempt>>,
    in_flight: AtomicBool,
    abandoned: Arc<AtomicBool>,
}

impl<B: VerifyBackend> VerificationController<B> {
    /// Create a controller with the default lockout policy
    pub fn new(extractor: FaceExtractor, backend: B) -> Self {
        Self::with_policy(extractor, backend, LockoutPolicy::default())
    }

    /// Create a controller with a custom lockout policy
    pub fn with_policy(extractor: FaceExtractor, backend: B, policy: LockoutPolicy) -> Self {
        Self {
            backend,
            extractor,
            policy,
            lockout: RwLock::new(LockoutState::default()),
            progress: RwLock::new(AttemptState::Idle),
            attempts: RwLock::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ATTEMPT LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one full verification attempt against the given frame source.
    ///
    /// Recoverable failures come back as `Ok(Failed(reason))` with the
    /// reason surfaced distinctly; `Err` is reserved for conditions that
    /// keep the capture UI closed (lockout, a concurrent attempt, a dead
    /// capture device).
    pub async fn run_attempt<S: FrameSource>(&self, source: S) -> GateResult<AttemptOutcome> {
        let started = Utc::now();

        if self.lockout.read().is_locked(started) {
            return Err(GateError::VerificationLocked);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(GateError::AttemptInFlight);
        }
        self.abandoned.store(false, Ordering::SeqCst);

        let cycle = self.attempt_cycle(source).await;
        self.in_flight.store(false, Ordering::SeqCst);

        let outcome = match cycle {
            Ok(outcome) => outcome,
            Err(e) => {
                *self.progress.write() = AttemptState::Idle;
                return Err(e);
            }
        };

        if self.abandoned.swap(false, Ordering::SeqCst) {
            log::debug!("attempt abandoned mid-flight; result discarded");
            *self.progress.write() = AttemptState::Idle;
            return Ok(AttemptOutcome::Discarded);
        }

        match outcome {
            AttemptOutcome::Verified => {
                self.lockout.write().record_success();
                self.attempts
                    .write()
                    .push(VerificationAttempt::resolved(started, AttemptResult::Verified));
            }
            AttemptOutcome::Failed(reason) => {
                self.lockout
                    .write()
                    .record_failure(reason, Utc::now(), &self.policy);
                self.attempts.write().push(VerificationAttempt::resolved(
                    started,
                    AttemptResult::Failed(reason),
                ));
            }
            AttemptOutcome::Discarded => {}
        }

        Ok(outcome)
    }

    /// Capturing -> Extracting -> Submitting, camera released before the
    /// network round-trip and on every early exit
    async fn attempt_cycle<S: FrameSource>(&self, source: S) -> GateResult<AttemptOutcome> {
        *self.progress.write() = AttemptState::Capturing;
        let mut capture = ScopedCapture::acquire(source);
        let frame = capture.grab()?;
        capture.release();

        *self.progress.write() = AttemptState::Extracting;
        let outcome = match self.extractor.extract(&frame.bytes) {
            Err(e) => {
                // an unprocessable frame gets the same advice as a missing
                // face: re-capture under better conditions
                log::warn!("captured frame could not be processed: {}", e);
                AttemptOutcome::Failed(FailureReason::NoFaceDetected)
            }
            Ok(Extraction::NotFound) => AttemptOutcome::Failed(FailureReason::NoFaceDetected),
            Ok(Extraction::Face(descriptor)) => {
                *self.progress.write() = AttemptState::Submitting;
                match self.backend.verify(&descriptor).await {
                    Ok(verdict) if verdict.success => AttemptOutcome::Verified,
                    Ok(verdict) => {
                        log::info!(
                            "server rejected descriptor: {}",
                            verdict.message.as_deref().unwrap_or("no detail")
                        );
                        AttemptOutcome::Failed(FailureReason::Mismatch)
                    }
                    Err(GateError::NetworkError(e)) => {
                        log::warn!("verification submit failed in transit: {}", e);
                        AttemptOutcome::Failed(FailureReason::NetworkError)
                    }
                    Err(e) => {
                        log::warn!("verification submit failed server-side: {}", e);
                        AttemptOutcome::Failed(FailureReason::ServerError)
                    }
                }
                // the transient descriptor drops (and zeroizes) here
            }
        };

        *self.progress.write() = match outcome {
            AttemptOutcome::Verified => AttemptState::Verified,
            AttemptOutcome::Failed(reason) => AttemptState::Failed(reason),
            AttemptOutcome::Discarded => AttemptState::Idle,
        };
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    /// Current attempt stage
    pub fn progress(&self) -> AttemptState {
        *self.progress.read()
    }

    /// Whether an attempt is currently in flight
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Handle for the modal-close path
    pub fn abandon_handle(&self) -> AbandonHandle {
        AbandonHandle(Arc::clone(&self.abandoned))
    }

    /// Resolved attempts, oldest first
    pub fn attempts(&self) -> Vec<VerificationAttempt> {
        self.attempts.read().clone()
    }

    /// Mismatches left before lockout
    pub fn remaining_attempts(&self) -> u8 {
        self.lockout.read().remaining_attempts(&self.policy)
    }

    /// Whether the controller currently refuses attempts
    pub fn is_locked(&self) -> bool {
        self.lockout.read().is_locked(Utc::now())
    }
}
