use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Static reference object drawn over the feed, in display space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceObject {
    pub center: (i32, i32),
    pub radius: u32,
}

/// Upper bound for `render_fps` and `max_send_fps`
pub const MAX_FPS: u32 = 1000;

/// Session configuration, loadable from a JSON file and overridable from the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Detector service WebSocket URL
    pub service_url: String,
    /// Native capture resolution (also the display resolution)
    pub display: Size,
    /// Downscaled size of every payload sent to the detector
    pub transmission: Size,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    pub reconnect_delay_ms: u64,
    pub watchdog_timeout_ms: u64,
    /// Render loop cadence
    pub render_fps: u32,
    /// Optional ceiling on payloads per second. `None` lets round-trip
    /// time alone set the pace.
    pub max_send_fps: Option<u32>,
    pub object: ReferenceObject,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_url: "ws://localhost:8000/ws".to_string(),
            display: Size::new(640, 480),
            transmission: Size::new(320, 240),
            jpeg_quality: 90,
            reconnect_delay_ms: 1000,
            watchdog_timeout_ms: 2000,
            render_fps: 30,
            max_send_fps: None,
            object: ReferenceObject {
                center: (320, 240),
                radius: 50,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl SessionConfig {
    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: SessionConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.display.width == 0 || self.display.height == 0 {
            return invalid("display size must be non-zero");
        }
        if self.transmission.width == 0 || self.transmission.height == 0 {
            return invalid("transmission size must be non-zero");
        }
        if self.transmission.width >= self.display.width
            || self.transmission.height >= self.display.height
        {
            return invalid("transmission size must be smaller than display size");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return invalid("jpeg_quality must be within 1-100");
        }
        if self.reconnect_delay_ms == 0 || self.watchdog_timeout_ms == 0 {
            return invalid("reconnect and watchdog delays must be non-zero");
        }
        let rate_ok = |fps: u32| (1..=MAX_FPS).contains(&fps);
        if !rate_ok(self.render_fps) || !self.max_send_fps.map_or(true, rate_ok) {
            return invalid("frame rates must be within 1-1000");
        }
        if self.object.radius > self.display.width.max(self.display.height) {
            return invalid("object radius must not exceed the display size");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.render_fps.max(1) as u64)
    }

    /// Minimum spacing between payloads, if a ceiling is configured
    pub fn min_send_interval(&self) -> Option<Duration> {
        self.max_send_fps
            .map(|fps| Duration::from_micros(1_000_000 / fps.max(1) as u64))
    }
}
