use serde::Serialize;
use std::time::Instant;

use crate::frame::FrameSample;
use crate::matcher::{MatchError, MatchOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
}

/// Loop bookkeeping. Mutated only by `SessionController` transitions.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) status: SessionStatus,
    /// Bumped on every start and stop; results tagged with an older epoch are void.
    pub(crate) epoch: u64,
    pub(crate) last_dispatch_at: Option<Instant>,
    /// Logical mutex: true while one verification call is outstanding.
    pub(crate) busy: bool,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            epoch: 0,
            last_dispatch_at: None,
            busy: false,
        }
    }
}

/// One dispatched verification call. Owns the sample until the matcher returns.
#[derive(Debug)]
pub struct VerificationRequest {
    pub request_id: u64,
    pub epoch: u64,
    pub issued_at: Instant,
    pub sample: FrameSample,
}

/// Settled verification call, tagged with the identity of its request.
#[derive(Debug)]
pub struct VerificationResult {
    pub request_id: u64,
    pub epoch: u64,
    pub issued_at: Instant,
    pub outcome: Result<MatchOutcome, MatchError>,
}

/// What presentation code shows. `None` identity means "no match".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DisplayState {
    pub matched_identity: Option<String>,
    pub similarity_score: Option<f64>,
    pub data_integrity: Option<bool>,
    /// Issue time of the last result applied to this state (match or no-match).
    #[serde(skip)]
    pub last_accepted_issued_at: Option<Instant>,
}

impl DisplayState {
    pub fn is_match(&self) -> bool {
        self.matched_identity.is_some()
    }

    /// Same identity/score/integrity, ignoring bookkeeping timestamps.
    pub fn same_decision(&self, other: &DisplayState) -> bool {
        self.matched_identity == other.matched_identity
            && self.similarity_score == other.similarity_score
            && self.data_integrity == other.data_integrity
    }
}

/// Running counters for one controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub dispatched: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub stale: u64,
    pub failed: u64,
    pub no_frame: u64,
}
