//! Frame sources.
//!
//! This module provides different sources for captured stills:
//! - Synthetic camera (`stub://`, testing and demos)
//! - Local still-image directory
//! - HTTP cameras serving MJPEG or JPEG snapshots (feature: ingest-http)
//!
//! All sources implement `FrameSource` and produce `FrameSample` instances that
//! flow straight into one verification dispatch.
//! The ingestion layer is responsible for:
//! - Binding and releasing the capture device
//! - Reporting "not producing frames yet" as a soft `NoFrameAvailable`
//! - Keeping `capture()` non-blocking (background readers hold the latest frame)
//!
//! The ingestion layer MUST NOT:
//! - Store captured frames to disk
//! - Retain frames after handing them to the caller
//! - Log frame content

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::frame::FrameSample;

pub mod dir;
#[cfg(feature = "ingest-http")]
pub mod http;
pub mod stub;

pub use dir::{load_still, DirectorySource};
#[cfg(feature = "ingest-http")]
pub use http::HttpCameraSource;
pub use stub::StubSource;

/// Largest frame edge a JPEG header can describe.
pub const MAX_FRAME_DIMENSION: u32 = u16::MAX as u32;

/// Capture failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened (permission denied, no hardware, unreachable).
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device is bound but not producing frames yet. Soft; retry on the next tick.
    #[error("no frame available")]
    NoFrameAvailable,
}

/// A live capture device that yields still samples on demand.
pub trait FrameSource: Send {
    /// Bind to the device. Idempotent if already acquired.
    fn acquire(&mut self) -> Result<(), CaptureError>;

    /// Sample the currently displayed frame. Never blocks on the device.
    fn capture(&mut self) -> Result<FrameSample, CaptureError>;

    /// Stop the device. Idempotent; safe to call when not acquired.
    fn release(&mut self);

    fn is_acquired(&self) -> bool;

    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        (**self).acquire()
    }

    fn capture(&mut self) -> Result<FrameSample, CaptureError> {
        (**self).capture()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_acquired(&self) -> bool {
        (**self).is_acquired()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Camera configuration shared by all backends.
#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// Source URL: `stub://name`, a local directory path, or `http(s)://...`.
    pub url: String,
    /// Frame width (synthetic frames).
    pub width: u32,
    /// Frame height (synthetic frames).
    pub height: u32,
    /// Reader rate for snapshot polling (frames per second).
    pub target_fps: u32,
    /// JPEG quality for synthetic frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
            jpeg_quality: 80,
        }
    }
}

/// Open the backend matching the URL scheme. The source is returned unacquired.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("camera url must not be empty"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(StubSource::new(settings.clone())?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Box::new(HttpCameraSource::new(settings.clone())?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!("http cameras require the ingest-http feature"));
        }
    }
    Ok(Box::new(DirectorySource::new(url)?))
}
