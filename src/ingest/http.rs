//! HTTP camera source.
//!
//! This module provides `HttpCameraSource` for IP cameras and capture bridges that
//! serve either an MJPEG multipart stream or a single-JPEG snapshot endpoint.
//!
//! A background reader thread keeps only the most recent JPEG. `capture()` copies
//! that frame out without touching the network, so a session tick never blocks on
//! the camera. A frame older than the health grace window counts as "no frame".
//!
//! The HTTP camera source MUST NOT:
//! - Store frames to disk
//! - Forward frames anywhere except the caller of `capture()`
//! - Keep more than one frame

use anyhow::{anyhow, Context, Result};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use url::Url;

use super::{CameraSettings, CaptureError, FrameSource};
use crate::frame::FrameSample;

const MAX_JPEG_BYTES: usize = 4 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const HEALTH_GRACE_FLOOR: Duration = Duration::from_secs(2);

struct LatestFrame {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: Instant,
}

type FrameSlot = Arc<Mutex<Option<LatestFrame>>>;

struct Reader {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

pub struct HttpCameraSource {
    settings: CameraSettings,
    agent: ureq::Agent,
    latest: FrameSlot,
    reader: Option<Reader>,
}

impl HttpCameraSource {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        let url = Url::parse(&settings.url).context("parse camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported camera scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(CONNECT_TIMEOUT)
            .build();
        Ok(Self {
            settings,
            agent,
            latest: Arc::new(Mutex::new(None)),
            reader: None,
        })
    }

    fn stale_after(&self) -> Duration {
        health_grace(self.settings.target_fps)
    }
}

impl FrameSource for HttpCameraSource {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let response = self
            .agent
            .get(&self.settings.url)
            .call()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", self.settings.url, e)))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            // The probe response already holds one snapshot; publish it right away.
            let jpeg = read_body(response.into_reader())
                .map_err(|e| CaptureError::DeviceUnavailable(format!("{:#}", e)))?;
            publish(&self.latest, jpeg);
            HttpStream::Snapshot
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = ReaderWorker {
            url: self.settings.url.clone(),
            agent: self.agent.clone(),
            interval: frame_interval(self.settings.target_fps),
            latest: Arc::clone(&self.latest),
            shutdown: Arc::clone(&shutdown),
        };
        let join = std::thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || worker.run(stream))
            .map_err(|e| CaptureError::DeviceUnavailable(format!("spawn camera reader: {}", e)))?;
        self.reader = Some(Reader { shutdown, join });
        log::info!("HttpCameraSource: acquired {}", self.settings.url);
        Ok(())
    }

    fn capture(&mut self) -> Result<FrameSample, CaptureError> {
        if self.reader.is_none() {
            return Err(CaptureError::NoFrameAvailable);
        }
        let guard = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let frame = guard.as_ref().ok_or(CaptureError::NoFrameAvailable)?;
        if frame.captured_at.elapsed() > self.stale_after() {
            return Err(CaptureError::NoFrameAvailable);
        }
        Ok(FrameSample::captured(
            frame.jpeg.clone(),
            frame.width,
            frame.height,
            frame.captured_at,
        ))
    }

    fn release(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        reader.shutdown.store(true, Ordering::SeqCst);
        // An MJPEG read may be parked until the next chunk; the read timeout bounds the join.
        if reader.join.join().is_err() {
            log::warn!("HttpCameraSource: reader thread panicked");
        }
        match self.latest.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        log::info!("HttpCameraSource: released {}", self.settings.url);
    }

    fn is_acquired(&self) -> bool {
        self.reader.is_some()
    }

    fn describe(&self) -> String {
        self.settings.url.clone()
    }
}

impl Drop for HttpCameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

struct ReaderWorker {
    url: String,
    agent: ureq::Agent,
    interval: Duration,
    latest: FrameSlot,
    shutdown: Arc<AtomicBool>,
}

impl ReaderWorker {
    fn run(self, mut stream: HttpStream) {
        let mut last_error: Option<String> = None;
        while !self.shutdown.load(Ordering::SeqCst) {
            let next = match &mut stream {
                HttpStream::Mjpeg(mjpeg) => mjpeg.read_next_jpeg(),
                HttpStream::Snapshot => {
                    std::thread::sleep(self.interval);
                    fetch_single_jpeg(&self.agent, &self.url)
                }
            };
            match next {
                Ok(jpeg) => {
                    if last_error.take().is_some() {
                        log::info!("HttpCameraSource: {} recovered", self.url);
                    }
                    publish(&self.latest, jpeg);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    if last_error.as_deref() != Some(message.as_str()) {
                        log::warn!("HttpCameraSource: {}: {}", self.url, message);
                    }
                    last_error = Some(message);
                    std::thread::sleep(RECONNECT_BACKOFF);
                    if let HttpStream::Mjpeg(_) = stream {
                        match self.reconnect() {
                            Ok(fresh) => stream = fresh,
                            Err(e) => log::debug!("HttpCameraSource: reconnect failed: {:#}", e),
                        }
                    }
                }
            }
        }
    }

    fn reconnect(&self) -> Result<HttpStream> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .context("reconnect to camera stream")?;
        Ok(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())))
    }
}

fn publish(slot: &FrameSlot, jpeg: Vec<u8>) {
    let (width, height) = match jpeg_dimensions(&jpeg) {
        Ok(dims) => dims,
        Err(e) => {
            log::debug!("HttpCameraSource: dropping undecodable frame: {:#}", e);
            return;
        }
    };
    let frame = LatestFrame {
        jpeg,
        width,
        height,
        captured_at: Instant::now(),
    };
    match slot.lock() {
        Ok(mut guard) => *guard = Some(frame),
        Err(poisoned) => *poisoned.into_inner() = Some(frame),
    }
}

/// Pulls complete JPEGs (SOI..EOI) out of a multipart byte stream, ignoring the
/// part headers in between.
struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    pending: Vec<u8>,
}

impl MjpegStream {
    const READ_CHUNK: usize = 16 * 1024;

    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; Self::READ_CHUNK];
        loop {
            if let Some((soi, eoi)) = find_jpeg_bounds(&self.pending) {
                let jpeg: Vec<u8> = self.pending.drain(..eoi).skip(soi).collect();
                return Ok(jpeg);
            }
            if self.pending.len() > MAX_JPEG_BYTES {
                // Oversized or corrupt part: resync on the next start marker.
                log::debug!("HttpCameraSource: discarding {} unframed bytes", self.pending.len());
                let tail = self.pending.split_off(self.pending.len() - 1);
                self.pending = tail;
            }
            match self.reader.read(&mut chunk) {
                Ok(0) => return Err(anyhow!("camera closed the mjpeg stream")),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!("mjpeg read failed: {}", e)),
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("GET {}", url))?;
    read_body(response.into_reader())
}

fn read_body(reader: Box<dyn Read + Send + Sync>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read snapshot body")?;
    if bytes.is_empty() {
        return Err(anyhow!("camera returned an empty snapshot"));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("snapshot larger than {} bytes", MAX_JPEG_BYTES));
    }
    Ok(bytes)
}

fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("sniff frame format")?;
    reader.into_dimensions().context("read frame dimensions")
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    match target_fps {
        0 => Duration::from_millis(100),
        fps => Duration::from_secs(1) / fps,
    }
}

/// Six frame intervals, never less than two seconds.
fn health_grace(target_fps: u32) -> Duration {
    (frame_interval(target_fps) * 6).max(HEALTH_GRACE_FLOOR)
}
