//! Remote face matcher boundary.
//!
//! The matcher scores one still against the enrolled identity set. It is a
//! single-shot blocking call with no internal retries; the session controller runs
//! it off its own thread and applies its own response timeout.

use thiserror::Error;

use crate::frame::FrameSample;

pub mod http;

pub use http::{HttpMatcher, HttpMatcherConfig};

/// What the matcher said about one still.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchOutcome {
    pub success: bool,
    pub matched_identity: Option<String>,
    /// Similarity in `[0, 1]`, when the matcher reports one.
    pub similarity_score: Option<f64>,
    pub message: Option<String>,
    /// Whether the stored template for the matched identity passed its integrity check.
    pub data_integrity: Option<bool>,
}

impl MatchOutcome {
    pub fn matched(identity: impl Into<String>, score: f64) -> Self {
        Self {
            success: true,
            matched_identity: Some(identity.into()),
            similarity_score: Some(score),
            ..Self::default()
        }
    }

    pub fn no_match() -> Self {
        Self::default()
    }
}

/// Failed matcher call. Every variant is transient from the session's point of view.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("matcher transport error: {0}")]
    Transport(String),

    #[error("matcher returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("matcher did not respond in time")]
    Timeout,

    #[error("matcher response could not be decoded: {0}")]
    Decode(String),
}

/// Scores a still against known identities.
pub trait Matcher: Send + Sync + 'static {
    fn verify(&self, sample: &FrameSample) -> Result<MatchOutcome, MatchError>;
}
