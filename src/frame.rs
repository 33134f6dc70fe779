//! Captured still isolation layer.
//!
//! - `FrameSample`: Opaque container for one encoded still. Bytes are private.
//!
//! A sample is created by a `FrameSource` on capture, moved into exactly one
//! verification dispatch, and dropped as soon as the matcher call returns.
//! There is no buffer, no `Clone`, and no serialization: the only way bytes
//! leave a sample is the base64 body of a matcher or enrollment request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Instant;
use zeroize::Zeroize;

// ----------------------------------------------------------------------------
// FrameSample: Opaque encoded still
// ----------------------------------------------------------------------------

/// Opaque encoded still (JPEG or PNG). Bytes are private; there is no `.as_bytes()`,
/// no `Clone`, no `Serialize`.
pub struct FrameSample {
    /// Encoded image data. MUST NOT be logged or retained after dispatch.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic capture instant.
    captured_at: Instant,
}

// Explicitly NOT implementing Clone, AsRef<[u8]>, or Serialize.

impl FrameSample {
    /// Wrap an encoded still captured now.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::captured(data, width, height, Instant::now())
    }

    /// Wrap an encoded still captured at `captured_at` (e.g. by a background reader).
    pub fn captured(data: Vec<u8>, width: u32, height: u32, captured_at: Instant) -> Self {
        Self {
            data,
            width,
            height,
            captured_at,
        }
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Short content fingerprint for logs. Never log the sample itself.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.data);
        hex::encode(&digest[..6])
    }

    /// Plain base64 of the encoded bytes, without a Data-URI prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl fmt::Debug for FrameSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSample")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Drop for FrameSample {
    fn drop(&mut self) {
        // Zeroize image data on drop to limit exposure window.
        self.data.zeroize();
    }
}
