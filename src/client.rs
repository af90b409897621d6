//! ExamGate - Backend Collaborators
//!
//! HTTP client for the account, exam and enrollment backends. Plain JSON
//! over HTTPS with bearer auth; explicit timeouts; no automatic retries -
//! transient failures surface as `NetworkError` for the user to re-trigger.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::{VerifyBackend, VerifyVerdict};
use crate::descriptor::FaceDescriptor;
use crate::eligibility::{self, EligibilityResult};
use crate::error::{GateError, GateResult};
use crate::scheduler::ExamSettings;

/// Default timeout for backend requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the exam-platform backends
pub struct BackendClient {
    /// HTTP client (reusable connection pool)
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

/// Verification submission body: `{ "faceDescriptor": number[] }`
#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "faceDescriptor")]
    face_descriptor: &'a FaceDescriptor,
}

/// Verification endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Registration-time enrollment body, descriptor as a plain numeric array
#[derive(Debug, Serialize)]
pub struct EnrollmentRequest {
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub email: String,
    #[serde(rename = "faceDescriptor")]
    pub face_descriptor: FaceDescriptor,
}

/// Eligibility query with the fail-closed policy already applied
#[derive(Debug, Clone)]
pub struct EligibilityOutcome {
    pub result: EligibilityResult,
    /// Soft-error banner text when the progress source was unreachable
    pub degraded: Option<String>,
}

impl BackendClient {
    /// Create a client with default timeout settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            bearer_token: None,
        }
    }

    /// Attach the learner's bearer token to every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // VERIFICATION SUBMISSION
    // ═══════════════════════════════════════════════════════════════════════

    /// `POST /exams/verify-face` with the transient descriptor. The match
    /// against the registration-time descriptor happens server-side.
    pub async fn submit_descriptor(
        &self,
        descriptor: &FaceDescriptor,
    ) -> GateResult<VerifyResponse> {
        let url = self.url("exams/verify-face");
        let body = VerifyRequest {
            face_descriptor: descriptor,
        };

        let response = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(GateError::ServerError(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        response
            .json::<VerifyResponse>()
            .await
            .map_err(|e| GateError::ServerError(format!("malformed verification response: {e}")))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ELIGIBILITY
    // ═══════════════════════════════════════════════════════════════════════

    /// `GET /enrollment/eligibility`. The gate is recomputed locally from
    /// the course rows so client and server agree by construction; drift
    /// against the server's own flag is logged.
    pub async fn fetch_eligibility(&self) -> GateResult<EligibilityResult> {
        let url = self.url("enrollment/eligibility");

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| GateError::EligibilityUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GateError::EligibilityUnreachable(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let wire: EligibilityResult = response
            .json()
            .await
            .map_err(|e| GateError::EligibilityUnreachable(format!("malformed response: {e}")))?;

        let local = eligibility::evaluate(&wire.courses);
        if local.exam_eligible != wire.exam_eligible {
            log::warn!(
                "eligibility drift: server says {}, local evaluation says {}",
                wire.exam_eligible,
                local.exam_eligible
            );
        }
        Ok(local)
    }

    /// Eligibility with the fail-closed policy applied: an unreachable
    /// progress source reads as ineligible with a soft error, never a crash
    pub async fn evaluate_eligibility(&self) -> EligibilityOutcome {
        match self.fetch_eligibility().await {
            Ok(result) => EligibilityOutcome {
                result,
                degraded: None,
            },
            Err(e) => {
                log::warn!("eligibility source unreachable, failing closed: {}", e);
                EligibilityOutcome {
                    result: EligibilityResult {
                        exam_eligible: false,
                        courses: Vec::new(),
                    },
                    degraded: Some(e.to_string()),
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SETTINGS / ENROLLMENT
    // ═══════════════════════════════════════════════════════════════════════

    /// `GET /exams/settings`, validated into the 1-60 minute range
    pub async fn fetch_settings(&self) -> GateResult<ExamSettings> {
        let url = self.url("exams/settings");

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(GateError::ServerError(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let settings: ExamSettings = response
            .json()
            .await
            .map_err(|e| GateError::ServerError(format!("malformed settings response: {e}")))?;

        settings.interval()?;
        Ok(settings)
    }

    /// `POST /register` with the registration-time descriptor alongside the
    /// account fields
    pub async fn register_enrollment(&self, enrollment: &EnrollmentRequest) -> GateResult<()> {
        let url = self.url("register");

        let response = self
            .authorized(self.http.post(&url))
            .json(enrollment)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(GateError::ServerError(format!(
                "HTTP status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl VerifyBackend for BackendClient {
    fn verify(
        &self,
        descriptor: &FaceDescriptor,
    ) -> impl Future<Output = GateResult<VerifyVerdict>> + Send {
        async move {
            let response = self.submit_descriptor(descriptor).await?;
            Ok(VerifyVerdict {
                success: response.success,
                message: response.message,
            })
        }
    }
}

/// Distinguish requests that never reached the server from server-side
/// failures. The user sees the same retry prompt either way; the split is
/// for logging.
fn transport_error(e: reqwest::Error) -> GateError {
    if e.is_timeout() {
        GateError::NetworkError(format!("request timed out: {e}"))
    } else if e.is_connect() {
        GateError::NetworkError(format!("connection failed: {e}"))
    } else if e.is_request() {
        GateError::NetworkError(e.to_string())
    } else {
        GateError::ServerError(e.to_string())
    }
}
