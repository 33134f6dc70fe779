//! Local still-image directory source.
//!
//! This module provides `DirectorySource`, which replays a directory of encoded
//! stills (`.jpg`, `.jpeg`, `.png`) in name order, wrapping around at the end.
//! It stands in for a camera on kiosks without one and in field reproductions.
//!
//! The directory source MUST NOT:
//! - Fetch remote URLs
//! - Write, move, or delete files
//! - Retain stills beyond handoff to the caller

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{CaptureError, FrameSource};
use crate::frame::FrameSample;

const STILL_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct DirectorySource {
    path: PathBuf,
    stills: Vec<PathBuf>,
    cursor: usize,
    acquired: bool,
}

impl DirectorySource {
    pub fn new(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "directory source only supports local paths (no URL schemes)"
            ));
        }
        Ok(Self {
            path: PathBuf::from(path),
            stills: Vec::new(),
            cursor: 0,
            acquired: false,
        })
    }

    fn scan(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut stills: Vec<PathBuf> = std::fs::read_dir(&self.path)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && is_still(path))
            .collect();
        stills.sort();
        Ok(stills)
    }
}

impl FrameSource for DirectorySource {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.acquired {
            return Ok(());
        }
        let stills = self.scan().map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        if stills.is_empty() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} contains no still images",
                self.path.display()
            )));
        }
        log::info!(
            "DirectorySource: acquired {} ({} stills)",
            self.path.display(),
            stills.len()
        );
        self.stills = stills;
        self.cursor = 0;
        self.acquired = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<FrameSample, CaptureError> {
        if !self.acquired || self.stills.is_empty() {
            return Err(CaptureError::NoFrameAvailable);
        }
        let path = &self.stills[self.cursor % self.stills.len()];
        self.cursor = (self.cursor + 1) % self.stills.len();
        load_still(path).map_err(|e| {
            log::debug!("DirectorySource: skipping {}: {:#}", path.display(), e);
            CaptureError::NoFrameAvailable
        })
    }

    fn release(&mut self) {
        if self.acquired {
            self.acquired = false;
            self.stills.clear();
            log::info!("DirectorySource: released {}", self.path.display());
        }
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Load one encoded still from disk, reading its dimensions from the header.
pub fn load_still(path: &Path) -> Result<FrameSample> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("read image header {}", path.display()))?;
    let data = std::fs::read(path).with_context(|| format!("read still {}", path.display()))?;
    if data.is_empty() {
        return Err(anyhow!("empty still {}", path.display()));
    }
    Ok(FrameSample::new(data, width, height))
}

fn is_still(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| STILL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    !path.contains("://")
}
