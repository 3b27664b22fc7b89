//! Application configuration
//!
//! Loaded from `<config_dir>/rhat-live/config.toml`. Every section is
//! optional; missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::queue::OverflowPolicy;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub ui: UiConfig,
}

/// Remote session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint of the agent bridge
    pub endpoint: String,
    /// Key forwarded in `START_SESSION`
    pub api_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
        }
    }
}

/// Microphone and speaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// Capture rate sent to the agent
    pub input_sample_rate: u32,
    /// Rate of `AUDIO_OUTPUT` payloads
    pub output_sample_rate: u32,
    /// Samples per captured frame
    pub frame_size: usize,
    /// Captured frames buffered before the callback blocks
    pub input_queue_capacity: usize,
    /// Decoded responses buffered before the receive loop waits
    pub output_queue_capacity: usize,
    pub playback_pop_timeout_ms: u64,
    /// `input:<name>` device id; default device when unset
    pub input_device: Option<String>,
    /// `output:<name>` device id; default device when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            input_queue_capacity: 64,
            output_queue_capacity: 64,
            playback_pop_timeout_ms: 100,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    pub fn playback_pop_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_pop_timeout_ms)
    }
}

/// Camera frame sampling settings
/// Upper bound for `video.frame_rate`
pub const MAX_FRAME_RATE: u32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames sent per second
    pub frame_rate: u32,
    pub jpeg_quality: u8,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            queue_capacity: DEFAULT_VIDEO_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

impl VideoConfig {
    /// Send interval, `1 / frame_rate`
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

/// Duplex connection timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub connect_timeout_ms: u64,
    /// Receive poll interval; bounds how long cancellation takes
    pub recv_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Pause after a tool response before returning to listening
    pub tool_settle_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            recv_timeout_ms: 100,
            send_timeout_ms: 2_000,
            tool_settle_ms: 500,
        }
    }
}

impl ProtocolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn tool_settle(&self) -> Duration {
        Duration::from_millis(self.tool_settle_ms)
    }
}

/// Tool call and tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum identification score accepted by `highlightObject`
    pub match_threshold: f32,
    /// Ranked matches requested from the identifier
    pub top_k: usize,
    /// Interval between tracker updates while a session runs
    pub tick_ms: u64,
    /// Template tracker search window half-size in pixels
    pub search_radius: i32,
    /// Template tracker rejection threshold
    pub max_mean_diff: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            top_k: 3,
            tick_ms: 50,
            search_radius: 24,
            max_mean_diff: 40.0,
        }
    }
}

impl TrackingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Local control API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rhat-live")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, or defaults if there is none
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.input_sample_rate == 0 || audio.output_sample_rate == 0 {
            return Err(Error::Config("audio sample rates must be non-zero".into()));
        }
        if audio.frame_size == 0 {
            return Err(Error::Config("audio.frame_size must be non-zero".into()));
        }
        if audio.input_queue_capacity == 0 || audio.output_queue_capacity == 0 {
            return Err(Error::Config("audio queue capacities must be non-zero".into()));
        }

        let video = &self.video;
        if !(1..=MAX_FRAME_RATE).contains(&video.frame_rate) {
            return Err(Error::Config(format!(
                "video.frame_rate must be in 1..={}, got {}",
                MAX_FRAME_RATE, video.frame_rate
            )));
        }
        if !(1..=100).contains(&video.jpeg_quality) {
            return Err(Error::Config(format!(
                "video.jpeg_quality must be in 1..=100, got {}",
                video.jpeg_quality
            )));
        }
        if video.queue_capacity == 0 {
            return Err(Error::Config("video.queue_capacity must be non-zero".into()));
        }
        if video.overflow == OverflowPolicy::Block {
            return Err(Error::Config("video.overflow must drop, not block".into()));
        }

        let tracking = &self.tracking;
        if !(0.0..=1.0).contains(&tracking.match_threshold) {
            return Err(Error::Config(format!(
                "tracking.match_threshold must be in [0, 1], got {}",
                tracking.match_threshold
            )));
        }
        if tracking.top_k == 0 {
            return Err(Error::Config("tracking.top_k must be non-zero".into()));
        }

        if self.protocol.recv_timeout_ms == 0 || self.protocol.send_timeout_ms == 0 {
            return Err(Error::Config("protocol timeouts must be non-zero".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.video.interval(), Duration::from_millis(500));
        assert_eq!(config.video.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.session.endpoint, "ws://localhost:8765");
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [video]
            frame_rate = 5
            overflow = "drop_oldest"

            [tracking]
            match_threshold = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(config.video.frame_rate, 5);
        assert_eq!(config.video.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.video.jpeg_quality, 70);
        assert_eq!(config.tracking.match_threshold, 0.3);
        assert_eq!(config.audio.frame_size, 4096);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for doc in [
            "[video]\nframe_rate = 0",
            "[video]\nframe_rate = 2000",
            "[video]\njpeg_quality = 0",
            "[video]\noverflow = \"block\"",
            "[audio]\nframe_size = 0",
            "[audio]\ninput_queue_capacity = 0",
            "[tracking]\nmatch_threshold = 1.5",
        ] {
            assert!(
                matches!(AppConfig::from_toml(doc), Err(Error::Config(_))),
                "accepted {:?}",
                doc
            );
        }
    }

    #[test]
    fn test_fast_frame_rate_keeps_nonzero_interval() {
        let video = VideoConfig {
            frame_rate: 5000,
            ..VideoConfig::default()
        };
        assert!(video.interval() > Duration::ZERO);

        let video = VideoConfig {
            frame_rate: MAX_FRAME_RATE,
            ..VideoConfig::default()
        };
        assert!(video.interval() >= Duration::from_millis(16));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            AppConfig::from_toml("[video\nframe_rate = "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("rhat-live-missing-config-does-not-exist.toml");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.ui.http_port, 8080);
    }
}
