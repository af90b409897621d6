//! # ExamGate
//!
//! Face verification and exam eligibility core for proctored e-learning
//! exams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        EXAMGATE                           │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  EXTRACTOR  │  │   MATCHER    │  │   ELIGIBILITY   │  │
//! │  │  face→128f  │  │  dist < 0.6  │  │   EVALUATOR     │  │
//! │  └──────┬──────┘  └──────┬───────┘  └────────┬────────┘  │
//! │         │                │                    │           │
//! │  ┌──────┴────────────────┴────────────────────┴────────┐ │
//! │  │            VERIFICATION SESSION CONTROLLER           │ │
//! │  │     capture → extract → submit → verified/failed     │ │
//! │  └──────────────────────────┬───────────────────────────┘ │
//! │                             │                             │
//! │  ┌─────────────┐  ┌─────────┴─────┐  ┌─────────────────┐ │
//! │  │  RE-VERIFY  │  │  EXAM SESSION │  │  HTTP BACKENDS  │ │
//! │  │  SCHEDULER  │  │ state machine │  │ (verify/enroll) │ │
//! │  └─────────────┘  └───────────────┘  └─────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Verification model
//!
//! - Descriptors are transient: extracted per attempt, compared server-side
//!   against the registration-time copy, zeroized after comparison
//! - An Active session must re-verify every 1-60 minutes (admin-configured);
//!   an expired window always passes through Blocked
//! - Eligibility fails closed: an unreachable progress source reads as
//!   ineligible, never as a crash
//! - Consecutive identity rejections lock the controller out for a cooldown

pub mod api;
pub mod camera;
pub mod client;
pub mod controller;
pub mod descriptor;
pub mod eligibility;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod scheduler;
pub mod session;

pub use api::{ExamGate, GateStatus};
pub use camera::{Frame, FrameSource, StillImage};
pub use client::{BackendClient, EnrollmentRequest};
pub use controller::{AttemptOutcome, VerificationController, VerifyBackend, VerifyVerdict};
pub use descriptor::{FaceDescriptor, DESCRIPTOR_LEN};
pub use eligibility::{evaluate, CourseProgress, CourseStatus, EligibilityResult};
pub use error::{GateError, GateResult};
pub use extractor::{init_model, EmbeddingModel, Extraction, FaceExtractor};
pub use matcher::{decide, matches, MatchDecision, DEFAULT_MATCH_THRESHOLD};
pub use scheduler::{ExamSettings, ReverifyScheduler, SchedulerAction};
pub use session::{ExamSession, FailureReason, SessionStatus};

/// ExamGate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
