use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ingest::{CameraSettings, MAX_FRAME_DIMENSION};
use crate::matcher::http::{DEFAULT_MATCHER_URL, DEFAULT_RESPONSE_TIMEOUT};
use crate::matcher::HttpMatcherConfig;
use crate::session::{
    DecisionPolicy, SessionTiming, DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_MIN_INTERVAL,
    DEFAULT_TICK_INTERVAL,
};

const DEFAULT_CAMERA_URL: &str = "stub://webcam";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LiveVerifyConfigFile {
    matcher: Option<MatcherConfigFile>,
    camera: Option<CameraConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MatcherConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SessionConfigFile {
    tick_ms: Option<u64>,
    min_interval_ms: Option<u64>,
    acceptance_threshold: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LiveVerifyConfig {
    pub matcher_url: String,
    pub response_timeout: Duration,
    pub camera: CameraSettings,
    pub tick_interval: Duration,
    pub min_interval: Duration,
    pub acceptance_threshold: f64,
}

impl Default for LiveVerifyConfig {
    fn default() -> Self {
        Self::from_file(LiveVerifyConfigFile::default())
    }
}

impl LiveVerifyConfig {
    /// Defaults, then `LIVE_VERIFY_CONFIG` (TOML or JSON), then `LIVE_VERIFY_*` env.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVE_VERIFY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LiveVerifyConfigFile) -> Self {
        let matcher = file.matcher.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let session = file.session.unwrap_or_default();
        Self {
            matcher_url: matcher
                .url
                .unwrap_or_else(|| DEFAULT_MATCHER_URL.to_string()),
            response_timeout: matcher
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RESPONSE_TIMEOUT),
            camera: CameraSettings {
                url: camera
                    .url
                    .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                jpeg_quality: camera.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            tick_interval: session
                .tick_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TICK_INTERVAL),
            min_interval: session
                .min_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MIN_INTERVAL),
            acceptance_threshold: session
                .acceptance_threshold
                .unwrap_or(DEFAULT_ACCEPTANCE_THRESHOLD),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("LIVE_VERIFY_MATCHER_URL") {
            if !url.trim().is_empty() {
                self.matcher_url = url;
            }
        }
        if let Ok(url) = std::env::var("LIVE_VERIFY_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Some(ms) = env_millis("LIVE_VERIFY_TICK_MS")? {
            self.tick_interval = ms;
        }
        if let Some(ms) = env_millis("LIVE_VERIFY_MIN_INTERVAL_MS")? {
            self.min_interval = ms;
        }
        if let Some(ms) = env_millis("LIVE_VERIFY_TIMEOUT_MS")? {
            self.response_timeout = ms;
        }
        if let Ok(threshold) = std::env::var("LIVE_VERIFY_THRESHOLD") {
            self.acceptance_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("LIVE_VERIFY_THRESHOLD must be a number in [0, 1]"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.matcher_url.trim().is_empty() {
            return Err(anyhow!("matcher url must not be empty"));
        }
        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.camera.width > MAX_FRAME_DIMENSION || self.camera.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "camera dimensions must be at most {}x{}",
                MAX_FRAME_DIMENSION,
                MAX_FRAME_DIMENSION
            ));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        self.timing().validate()?;
        DecisionPolicy::new(self.acceptance_threshold)?;
        Ok(())
    }

    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            tick_interval: self.tick_interval,
            min_interval: self.min_interval,
            response_timeout: self.response_timeout,
        }
    }

    pub fn matcher(&self) -> HttpMatcherConfig {
        HttpMatcherConfig {
            base_url: self.matcher_url.clone(),
            timeout: self.response_timeout,
        }
    }

    pub fn policy(&self) -> Result<DecisionPolicy> {
        DecisionPolicy::new(self.acceptance_threshold)
    }
}

fn read_config_file(path: &Path) -> Result<LiveVerifyConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LiveVerifyConfig::default();
        assert_eq!(cfg.matcher_url, "http://127.0.0.1:8000/api");
        assert_eq!(cfg.tick_interval, Duration::from_millis(500));
        assert_eq!(cfg.min_interval, Duration::from_millis(1000));
        assert_eq!(cfg.response_timeout, Duration::from_secs(30));
        assert_eq!(cfg.acceptance_threshold, 0.55);
        assert_eq!(cfg.camera.url, "stub://webcam");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn tick_must_be_shorter_than_min_interval() {
        let cfg = LiveVerifyConfig {
            tick_interval: Duration::from_millis(1500),
            ..LiveVerifyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_camera_dimensions_are_rejected() {
        let mut cfg = LiveVerifyConfig::default();
        cfg.camera.width = 70_000;
        cfg.camera.height = 70_000;
        assert!(cfg.validate().is_err());

        cfg.camera.width = MAX_FRAME_DIMENSION;
        cfg.camera.height = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let cfg = LiveVerifyConfig {
            acceptance_threshold: 1.5,
            ..LiveVerifyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_sections_map_onto_settings() {
        let file: LiveVerifyConfigFile = toml::from_str(
            r#"
            [matcher]
            url = "http://matcher.local/api"
            timeout_ms = 5000

            [session]
            min_interval_ms = 2000
            acceptance_threshold = 0.7
            "#,
        )
        .unwrap();
        let cfg = LiveVerifyConfig::from_file(file);
        assert_eq!(cfg.matcher_url, "http://matcher.local/api");
        assert_eq!(cfg.response_timeout, Duration::from_secs(5));
        assert_eq!(cfg.min_interval, Duration::from_secs(2));
        assert_eq!(cfg.tick_interval, Duration::from_millis(500));
        assert_eq!(cfg.acceptance_threshold, 0.7);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<LiveVerifyConfigFile, _> =
            serde_json::from_str(r#"{"session": {"tick": 10}}"#);
        assert!(parsed.is_err());
    }
}
