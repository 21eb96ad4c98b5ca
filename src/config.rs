use crate::defaults;
use crate::error::{Result, VeilcastError};
use crate::pipeline::redaction::DetectionFailurePolicy;
use crate::pipeline::types::FrameGeometry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub frame: FrameConfig,
    pub acceleration: AccelerationConfig,
    pub detector: DetectorConfig,
    pub supervisor: SupervisorConfig,
    pub remux: RemuxConfig,
    pub tools: ToolsConfig,
}

/// Endpoints the pipeline reads from and publishes to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub input_url: String,
    pub intermediate_url: String,
    pub output_url: String,
}

/// Raw frame geometry, fixed for the lifetime of the process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Hardware acceleration preference for decode, encode, and detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AccelerationConfig {
    pub enabled: bool,
}

/// Face detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub input_size: u32,
    pub failure_policy: DetectionFailurePolicy,
}

/// Supervisor timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub stall_timeout_secs: u64,
    pub cooldown_secs: u64,
    pub probe_timeout_secs: u64,
}

/// Audio handling in the final mux
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemuxConfig {
    pub audio_codec: String,
    pub audio_bitrate: String,
}

/// External executables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input_url: defaults::INPUT_URL.to_string(),
            intermediate_url: defaults::INTERMEDIATE_URL.to_string(),
            output_url: defaults::OUTPUT_URL.to_string(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: defaults::FRAME_WIDTH,
            height: defaults::FRAME_HEIGHT,
            fps: defaults::FRAME_RATE,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(defaults::DETECTOR_MODEL_PATH),
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            input_size: defaults::DETECTOR_INPUT_SIZE,
            failure_policy: DetectionFailurePolicy::default(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: defaults::STALL_TIMEOUT_SECS,
            cooldown_secs: defaults::COOLDOWN_SECS,
            probe_timeout_secs: defaults::PROBE_TIMEOUT_SECS,
        }
    }
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            audio_codec: defaults::AUDIO_CODEC.to_string(),
            audio_bitrate: defaults::AUDIO_BITRATE.to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from(defaults::FFMPEG),
            ffprobe: PathBuf::from(defaults::FFPROBE),
        }
    }
}

impl SupervisorConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VeilcastError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VeilcastError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VeilcastError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SRT_URL → stream.input_url
    /// - VEILCAST_OUTPUT_URL → stream.output_url
    /// - INPUT_WIDTH → frame.width
    /// - INPUT_HEIGHT → frame.height
    /// - INPUT_FPS → frame.fps
    /// - USE_GPU → acceleration.enabled (0/1, true/false)
    /// - VEILCAST_MODEL → detector.model_path
    ///
    /// Empty values are ignored. Values that fail to parse are a configuration error.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(url) = env_value("SRT_URL") {
            self.stream.input_url = url;
        }

        if let Some(url) = env_value("VEILCAST_OUTPUT_URL") {
            self.stream.output_url = url;
        }

        if let Some(width) = env_value("INPUT_WIDTH") {
            self.frame.width = parse_env("INPUT_WIDTH", &width)?;
        }

        if let Some(height) = env_value("INPUT_HEIGHT") {
            self.frame.height = parse_env("INPUT_HEIGHT", &height)?;
        }

        if let Some(fps) = env_value("INPUT_FPS") {
            self.frame.fps = parse_env("INPUT_FPS", &fps)?;
        }

        if let Some(gpu) = env_value("USE_GPU") {
            self.acceleration.enabled = parse_flag("USE_GPU", &gpu)?;
        }

        if let Some(model) = env_value("VEILCAST_MODEL") {
            self.detector.model_path = PathBuf::from(model);
        }

        Ok(self)
    }

    /// Check every value the pipeline depends on.
    ///
    /// Called once at startup; a failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.stream.input_url.trim().is_empty() {
            return Err(invalid("stream.input_url", "must not be empty"));
        }
        if self.stream.intermediate_url.trim().is_empty() {
            return Err(invalid("stream.intermediate_url", "must not be empty"));
        }
        if self.stream.output_url.trim().is_empty() {
            return Err(invalid("stream.output_url", "must not be empty"));
        }

        for (key, value) in [("frame.width", self.frame.width), ("frame.height", self.frame.height)] {
            if value == 0 {
                return Err(invalid(key, "must be positive"));
            }
            if value % 2 != 0 {
                return Err(invalid(key, "must be even for yuv420p encoding"));
            }
        }
        if self.frame.fps == 0 {
            return Err(invalid("frame.fps", "must be positive"));
        }

        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "detector.confidence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.detector.input_size == 0 {
            return Err(invalid("detector.input_size", "must be positive"));
        }

        if self.supervisor.stall_timeout_secs == 0 {
            return Err(invalid("supervisor.stall_timeout_secs", "must be positive"));
        }
        if self.supervisor.cooldown_secs == 0 {
            return Err(invalid("supervisor.cooldown_secs", "must be positive"));
        }
        if !(1..=defaults::PROBE_TIMEOUT_SECS).contains(&self.supervisor.probe_timeout_secs) {
            return Err(invalid(
                "supervisor.probe_timeout_secs",
                &format!("must be between 1 and {}", defaults::PROBE_TIMEOUT_SECS),
            ));
        }

        Ok(())
    }

    /// Frame geometry shared by every stage.
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.frame.width, self.frame.height)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/veilcast/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("veilcast")
            .join("config.toml")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, &format!("'{}' is not a valid number", value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, &format!("'{}' is not a boolean flag", other))),
    }
}

fn invalid(key: &str, message: &str) -> VeilcastError {
    VeilcastError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
