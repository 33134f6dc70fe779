//! HTTP matcher client.
//!
//! Wire contract:
//! - `POST {base}/verify` with `{"image_base64": "<plain base64>"}`
//!   answers `{"success", "message"?, "matched_user"?, "similarity_score"?, "data_integrity"?}`
//! - `POST {base}/enroll` with `{"username", "admin_username", "image_base64"}`
//! - `GET {base}/health` answers `{"status": "healthy", ...}`
//!
//! Any non-2xx status, transport failure, or timeout is reported as a `MatchError`.
//! Error bodies follow the `{"detail": ...}` convention of the backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{MatchError, MatchOutcome, Matcher};
use crate::enroll::{EnrollError, EnrollReceipt, EnrollRequest, EnrollmentClient};
use crate::frame::FrameSample;

pub const DEFAULT_MATCHER_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_DETAIL_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct HttpMatcherConfig {
    /// API base, e.g. `http://127.0.0.1:8000/api`.
    pub base_url: String,
    /// Overall per-call timeout (connect + send + receive).
    pub timeout: Duration,
}

impl Default for HttpMatcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MATCHER_URL.to_string(),
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    image_base64: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    message: Option<String>,
    matched_user: Option<String>,
    similarity_score: Option<f64>,
    data_integrity: Option<bool>,
}

impl From<VerifyResponse> for MatchOutcome {
    fn from(response: VerifyResponse) -> Self {
        MatchOutcome {
            success: response.success,
            matched_identity: response.matched_user,
            similarity_score: response.similarity_score,
            message: response.message,
            data_integrity: response.data_integrity,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

pub struct HttpMatcher {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpMatcher {
    pub fn new(config: HttpMatcherConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verify an already-encoded still (plain base64, no Data-URI prefix).
    pub fn verify_base64(&self, image_base64: &str) -> Result<MatchOutcome, MatchError> {
        let url = format!("{}/verify", self.base_url);
        let response = self
            .agent
            .post(&url)
            .send_json(VerifyRequest { image_base64 })
            .map_err(classify_error)?;
        let body: VerifyResponse = response
            .into_json()
            .map_err(|e| MatchError::Decode(e.to_string()))?;
        Ok(body.into())
    }

    /// Probe `GET {base}/health`. `Ok(false)` means reachable but not healthy.
    pub fn health(&self) -> Result<bool, MatchError> {
        let url = format!("{}/health", self.base_url);
        let response = self.agent.get(&url).call().map_err(classify_error)?;
        let body: HealthResponse = response
            .into_json()
            .map_err(|e| MatchError::Decode(e.to_string()))?;
        Ok(body.status.eq_ignore_ascii_case("healthy"))
    }
}

impl Matcher for HttpMatcher {
    fn verify(&self, sample: &FrameSample) -> Result<MatchOutcome, MatchError> {
        self.verify_base64(&sample.to_base64())
    }
}

impl EnrollmentClient for HttpMatcher {
    fn enroll(&self, request: &EnrollRequest) -> Result<EnrollReceipt, EnrollError> {
        let url = format!("{}/enroll", self.base_url);
        match self.agent.post(&url).send_json(request) {
            Ok(response) => response
                .into_json::<EnrollReceipt>()
                .map_err(|e| EnrollError::Transport(format!("decode enroll response: {}", e))),
            Err(ureq::Error::Status(403, response)) => {
                Err(EnrollError::Locked(error_detail(response)))
            }
            Err(ureq::Error::Status(400, response)) => {
                Err(EnrollError::AlreadyExists(error_detail(response)))
            }
            Err(ureq::Error::Status(status, response)) => Err(EnrollError::Rejected {
                status,
                detail: error_detail(response),
            }),
            Err(ureq::Error::Transport(transport)) => {
                Err(EnrollError::Transport(transport.to_string()))
            }
        }
    }
}

fn classify_error(err: ureq::Error) -> MatchError {
    match err {
        ureq::Error::Status(status, response) => MatchError::Status {
            status,
            detail: error_detail(response),
        },
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                MatchError::Timeout
            } else {
                MatchError::Transport(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let io_timeout = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .map(|e| {
            matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
        .unwrap_or(false);
    io_timeout || transport.to_string().contains("timed out")
}

fn error_detail(response: ureq::Response) -> String {
    let raw = match response.into_string() {
        Ok(raw) => raw,
        Err(e) => return format!("unreadable error body: {}", e),
    };
    let detail = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => raw.clone(),
        },
        _ => raw.clone(),
    };
    detail.chars().take(MAX_DETAIL_CHARS).collect()
}
