pub mod capture;
pub mod error;
pub mod pipeline;
pub mod serve;
pub mod supervisor;
pub mod utils;
pub mod vision;

use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

/// System configuration, immutable for the process lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path, "auto" to scan /dev/video*, or "synthetic" for the
    /// built-in test-pattern source
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Geometry served for `?stream=lores` queries
    pub lores_width: u32,
    pub lores_height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// What the capture loop publishes each iteration
    pub publish: PublishMode,
    /// Consecutive capture failures tolerated before the loop gives up
    pub max_consecutive_failures: u32,
}

impl CaptureConfig {
    /// Target interval between frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub grace_period_ms: u64,
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Which artifact each capture iteration publishes. The background model
/// runs either way; this only selects what callers get to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    /// The captured frame, untouched
    Raw,
    /// The foreground mask produced by the transform
    Mask,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            server: ServerConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "auto".into(),
            width: 1920,
            height: 1080,
            lores_width: 640,
            lores_height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            publish: PublishMode::Raw,
            max_consecutive_failures: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 7860 }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from an optional `vigil.toml` in the working
    /// directory, with `VIGIL_*` environment variables layered on top of
    /// the defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("vigil").required(false))
            .add_source(config::Environment::with_prefix("VIGIL").separator("__"))
            .build()?
            .try_deserialize()
    }
}
