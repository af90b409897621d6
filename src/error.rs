//! ExamGate - Error Types

use thiserror::Error;

/// Result type for exam-gate operations
pub type GateResult<T> = Result<T, GateError>;

/// Exam-gate error types
#[derive(Error, Debug)]
pub enum GateError {
    // ═══════════════════════════════════════════════════════════════
    // MODEL ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Embedding model failed to load: {0}")]
    ModelLoadFailure(String),

    // ═══════════════════════════════════════════════════════════════
    // CAPTURE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    // ═══════════════════════════════════════════════════════════════
    // VERIFICATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid descriptor length: expected {expected}, got {actual}")]
    InvalidDescriptorLength { expected: usize, actual: usize },

    #[error("Verification locked - too many failed attempts")]
    VerificationLocked,

    #[error("A verification attempt is already in flight")]
    AttemptInFlight,

    // ═══════════════════════════════════════════════════════════════
    // SESSION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("Learner is not eligible to enter the exam room")]
    NotEligible,

    // ═══════════════════════════════════════════════════════════════
    // ELIGIBILITY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Eligibility source unreachable: {0}")]
    EligibilityUnreachable(String),

    // ═══════════════════════════════════════════════════════════════
    // NETWORK ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    // ═══════════════════════════════════════════════════════════════
    // CONFIG ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Re-verification interval out of range (1-60 minutes): {0}")]
    InvalidInterval(u32),

    // ═══════════════════════════════════════════════════════════════
    // IO / SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl GateError {
    /// Check if the user can recover by simply retrying the flow
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GateError::CameraUnavailable(_)
                | GateError::CaptureFailed(_)
                | GateError::ImageError(_)
                | GateError::NetworkError(_)
                | GateError::ServerError(_)
        )
    }

    /// Check if this error is fatal for the whole exam session
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::ModelLoadFailure(_))
    }

    /// Check if this error must be treated as "not eligible" rather
    /// than surfaced as a hard failure
    pub fn fails_closed(&self) -> bool {
        matches!(self, GateError::EligibilityUnreachable(_))
    }
}

impl From<image::ImageError> for GateError {
    fn from(e: image::ImageError) -> Self {
        GateError::ImageError(e.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::SerializationError(e.to_string())
    }
}
