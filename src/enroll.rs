//! Enrollment flow.
//!
//! A stage-gated controller for registering one identity:
//!
//! ```text
//! Capture → Preview → Details → Generating → Generated → Watermarking → Complete
//!              │                                  ▲            │
//!              └─ retake ─► Capture               └── failure ─┘
//! ```
//!
//! Each operation is only valid in its stage. A call in the wrong stage returns
//! `EnrollError::Stage` and leaves the flow untouched. The embedding itself is
//! computed and watermarked by the backend during the save call; `generate()` is the
//! local gate that checks the flow is complete before anything leaves the device.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::frame::FrameSample;
use crate::ingest::{CaptureError, FrameSource};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStage {
    Capture,
    Preview,
    Details,
    Generating,
    Generated,
    Watermarking,
    Complete,
}

impl fmt::Display for EnrollmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Capture => "capture",
            Self::Preview => "preview",
            Self::Details => "details",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Watermarking => "watermarking",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("enrollment is locked: {0}")]
    Locked(String),

    #[error("identity already enrolled: {0}")]
    AlreadyExists(String),

    #[error("enrollment rejected (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("enrollment transport error: {0}")]
    Transport(String),

    #[error("'{op}' is not valid in the {stage} stage")]
    Stage {
        op: &'static str,
        stage: EnrollmentStage,
    },

    #[error("missing identity detail: {0}")]
    MissingDetails(&'static str),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityDetails {
    pub name: String,
    pub employee_id: String,
    pub department: String,
}

impl IdentityDetails {
    fn validate(&self) -> Result<(), EnrollError> {
        if self.name.trim().is_empty() {
            return Err(EnrollError::MissingDetails("name"));
        }
        if self.employee_id.trim().is_empty() {
            return Err(EnrollError::MissingDetails("employee_id"));
        }
        if self.department.trim().is_empty() {
            return Err(EnrollError::MissingDetails("department"));
        }
        Ok(())
    }
}

/// `POST {base}/enroll` body.
#[derive(Debug, Serialize)]
pub struct EnrollRequest {
    pub username: String,
    pub admin_username: String,
    pub image_base64: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EnrollReceipt {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Backend that stores a watermarked template for a new identity.
pub trait EnrollmentClient {
    fn enroll(&self, request: &EnrollRequest) -> Result<EnrollReceipt, EnrollError>;
}

pub struct EnrollmentFlow {
    stage: EnrollmentStage,
    still: Option<FrameSample>,
    details: Option<IdentityDetails>,
    receipt: Option<EnrollReceipt>,
}

impl Default for EnrollmentFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrollmentFlow {
    pub fn new() -> Self {
        Self {
            stage: EnrollmentStage::Capture,
            still: None,
            details: None,
            receipt: None,
        }
    }

    pub fn stage(&self) -> EnrollmentStage {
        self.stage
    }

    pub fn still(&self) -> Option<&FrameSample> {
        self.still.as_ref()
    }

    pub fn details(&self) -> Option<&IdentityDetails> {
        self.details.as_ref()
    }

    pub fn receipt(&self) -> Option<&EnrollReceipt> {
        self.receipt.as_ref()
    }

    /// Capture → Preview, sampling the live source.
    pub fn capture<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> Result<(), EnrollError> {
        self.require("capture", &[EnrollmentStage::Capture])?;
        let still = source.capture()?;
        self.accept_still(still);
        Ok(())
    }

    /// Capture → Preview with an uploaded still.
    pub fn upload(&mut self, still: FrameSample) -> Result<(), EnrollError> {
        self.require("upload", &[EnrollmentStage::Capture])?;
        self.accept_still(still);
        Ok(())
    }

    /// Preview → Capture, discarding the still.
    pub fn retake(&mut self) -> Result<(), EnrollError> {
        self.require("retake", &[EnrollmentStage::Preview])?;
        self.still = None;
        self.stage = EnrollmentStage::Capture;
        Ok(())
    }

    /// Preview → Details.
    pub fn confirm(&mut self) -> Result<(), EnrollError> {
        self.require("confirm", &[EnrollmentStage::Preview])?;
        self.stage = EnrollmentStage::Details;
        Ok(())
    }

    /// Record identity details. Editing after generation returns to Details.
    pub fn set_details(&mut self, details: IdentityDetails) -> Result<(), EnrollError> {
        self.require(
            "set_details",
            &[EnrollmentStage::Details, EnrollmentStage::Generated],
        )?;
        details.validate()?;
        self.details = Some(details);
        self.stage = EnrollmentStage::Details;
        Ok(())
    }

    /// Details → Generated, once both the still and the details are present.
    pub fn generate(&mut self) -> Result<(), EnrollError> {
        self.require("generate", &[EnrollmentStage::Details])?;
        match &self.details {
            Some(details) => details.validate()?,
            None => return Err(EnrollError::MissingDetails("name")),
        }
        if self.still.is_none() {
            return Err(EnrollError::Stage {
                op: "generate",
                stage: self.stage,
            });
        }
        self.stage = EnrollmentStage::Generating;
        log::debug!("enrollment: template ready for watermarking");
        self.stage = EnrollmentStage::Generated;
        Ok(())
    }

    /// Generated → Watermarking → Complete. On failure the flow returns to Generated
    /// so the save can be retried.
    pub fn watermark_and_save<C: EnrollmentClient + ?Sized>(
        &mut self,
        client: &C,
        admin_username: &str,
    ) -> Result<&EnrollReceipt, EnrollError> {
        self.require("watermark_and_save", &[EnrollmentStage::Generated])?;
        let request = match (&self.still, &self.details) {
            (Some(still), Some(details)) => EnrollRequest {
                username: details.name.trim().to_string(),
                admin_username: admin_or_default(admin_username),
                image_base64: still.to_base64(),
            },
            _ => {
                return Err(EnrollError::Stage {
                    op: "watermark_and_save",
                    stage: self.stage,
                })
            }
        };

        self.stage = EnrollmentStage::Watermarking;
        match client.enroll(&request) {
            Ok(receipt) => {
                log::info!(
                    "enrolled '{}' by '{}'",
                    request.username,
                    request.admin_username
                );
                self.stage = EnrollmentStage::Complete;
                Ok(self.receipt.insert(receipt))
            }
            Err(e) => {
                log::warn!("enrollment of '{}' failed: {}", request.username, e);
                self.stage = EnrollmentStage::Generated;
                Err(e)
            }
        }
    }

    /// Any stage → Capture with everything cleared.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn accept_still(&mut self, still: FrameSample) {
        log::debug!("enrollment still {}", still.fingerprint());
        self.still = Some(still);
        self.stage = EnrollmentStage::Preview;
    }

    fn require(&self, op: &'static str, allowed: &[EnrollmentStage]) -> Result<(), EnrollError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(EnrollError::Stage {
                op,
                stage: self.stage,
            })
        }
    }
}

fn admin_or_default(admin_username: &str) -> String {
    let trimmed = admin_username.trim();
    if trimmed.is_empty() {
        DEFAULT_ADMIN_USERNAME.to_string()
    } else {
        trimmed.to_string()
    }
}
