//! Synthetic camera (`stub://`).
//!
//! Produces real JPEG stills from a generated scene so the full dispatch path can
//! run without hardware. Two knobs model device behavior seen in the field:
//!
//! - `stub://unavailable` fails `acquire()` like a denied camera permission.
//! - `?warmup=N` makes the first N captures after each acquire report
//!   `NoFrameAvailable`, like a video element whose metadata has not loaded.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use rand::Rng;

use super::{CameraSettings, CaptureError, FrameSource, MAX_FRAME_DIMENSION};
use crate::frame::FrameSample;

pub struct StubSource {
    settings: CameraSettings,
    unavailable: bool,
    warmup: u32,
    warmup_remaining: u32,
    acquired: bool,
    frame_count: u64,
    /// Simulated scene state so consecutive frames differ.
    scene_state: u8,
}

impl StubSource {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        let rest = settings
            .url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("stub source requires a stub:// url"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut warmup = 0;
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            match pair.split_once('=') {
                Some(("warmup", value)) => {
                    warmup = value
                        .parse()
                        .map_err(|_| anyhow!("stub warmup must be an integer, got '{}'", value))?;
                }
                _ => return Err(anyhow!("unsupported stub parameter '{}'", pair)),
            }
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        if settings.width > MAX_FRAME_DIMENSION || settings.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "stub frame dimensions must be at most {} per edge",
                MAX_FRAME_DIMENSION
            ));
        }
        Ok(Self {
            unavailable: name == "unavailable",
            settings,
            warmup,
            warmup_remaining: warmup,
            acquired: false,
            frame_count: 0,
            scene_state: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn encode_scene(&mut self) -> Result<Vec<u8>> {
        let width = self.settings.width;
        let height = self.settings.height;
        let pixel_count = buffer_len(width, height)
            .ok_or_else(|| anyhow!("frame {}x{} is too large to render", width, height))?;

        // Change scene state occasionally to simulate someone stepping in or out.
        if self.frame_count % 20 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut rng = rand::thread_rng();
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let base = (i as u64 + self.frame_count + self.scene_state as u64 * 37) % 256;
            // Sensor noise.
            *pixel = (base as u8).saturating_add(rng.gen_range(0..4));
        }

        let mut encoded = Vec::with_capacity(pixel_count / 8);
        let quality = self.settings.jpeg_quality.clamp(1, 100);
        JpegEncoder::new_with_quality(&mut encoded, quality)
            .encode(&pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| anyhow!("encode synthetic frame: {}", e))?;
        Ok(encoded)
    }
}

/// RGB8 buffer size, or `None` when it does not fit in memory addressing.
fn buffer_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(3)
}

impl FrameSource for StubSource {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.unavailable {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} refused access",
                self.settings.url
            )));
        }
        if !self.acquired {
            self.acquired = true;
            self.warmup_remaining = self.warmup;
            log::info!("StubSource: acquired {} (synthetic)", self.settings.url);
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<FrameSample, CaptureError> {
        if !self.acquired {
            return Err(CaptureError::NoFrameAvailable);
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return Err(CaptureError::NoFrameAvailable);
        }
        self.frame_count += 1;
        let encoded = match self.encode_scene() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::warn!("StubSource: {}", e);
                return Err(CaptureError::NoFrameAvailable);
            }
        };
        Ok(FrameSample::new(
            encoded,
            self.settings.width,
            self.settings.height,
        ))
    }

    fn release(&mut self) {
        if self.acquired {
            self.acquired = false;
            log::info!("StubSource: released {}", self.settings.url);
        }
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn describe(&self) -> String {
        self.settings.url.clone()
    }
}
