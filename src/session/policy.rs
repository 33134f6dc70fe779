//! Accept/reject decision for one matcher outcome.
//!
//! A positive decision needs `success == true`, a reported identity, and a score
//! strictly above the acceptance threshold. Everything else is a negative decision,
//! which clears the display rather than keeping the last known identity.

use anyhow::{anyhow, Result};

use crate::matcher::MatchOutcome;

/// Live-loop acceptance threshold. Independent of any settings-page threshold.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.55;

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Accept {
        identity: String,
        score: f64,
        data_integrity: Option<bool>,
    },
    Reject(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Matcher answered `success: false`.
    NotMatched,
    /// Score missing, non-finite, or at/below the threshold.
    BelowThreshold,
    /// `success: true` without an identity to show.
    MissingIdentity,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecisionPolicy {
    acceptance_threshold: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
        }
    }
}

impl DecisionPolicy {
    pub fn new(acceptance_threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&acceptance_threshold) {
            return Err(anyhow!(
                "acceptance threshold must be within [0, 1], got {}",
                acceptance_threshold
            ));
        }
        Ok(Self {
            acceptance_threshold,
        })
    }

    pub fn acceptance_threshold(&self) -> f64 {
        self.acceptance_threshold
    }

    pub fn decide(&self, outcome: &MatchOutcome) -> Decision {
        if !outcome.success {
            return Decision::Reject(RejectReason::NotMatched);
        }
        let score = match outcome.similarity_score {
            Some(score) if score.is_finite() && score > self.acceptance_threshold => score,
            _ => return Decision::Reject(RejectReason::BelowThreshold),
        };
        match outcome.matched_identity.as_deref() {
            Some(identity) if !identity.trim().is_empty() => Decision::Accept {
                identity: identity.to_string(),
                score,
                data_integrity: outcome.data_integrity,
            },
            _ => Decision::Reject(RejectReason::MissingIdentity),
        }
    }
}
