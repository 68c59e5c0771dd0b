//! Runtime configuration
//!
//! Values come from the environment with the defaults below. The core only
//! reads them; nothing here is reloaded while sessions are running.

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_FRAME_RATE: &str = "FRAMES_PER_SECOND";
pub const ENV_TIMEOUT_SECONDS: &str = "RECORD_SECONDS_AFTER_MOTION";
pub const ENV_RESOLUTION: &str = "RESOLUTION";
pub const ENV_OUTPUT_DIR: &str = "CAPTURE_OUTPUT_DIRECTORY";
pub const ENV_SCRATCH_DIR: &str = "CLIPWATCH_SCRATCH_DIR";
pub const ENV_SAMPLE_DETECTION: &str = "SAMPLE_CV_DETECTION";

/// Which frames are handed to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum ClassificationPolicy {
    /// Classify every frame
    EveryFrame,
    /// Classify only frames whose 1-based index is a multiple of `every`
    Sampled { every: u32 },
}

impl ClassificationPolicy {
    /// Whether frame `index` (1-based) is classified under this policy
    pub fn should_classify(&self, index: u64) -> bool {
        match *self {
            ClassificationPolicy::EveryFrame => true,
            ClassificationPolicy::Sampled { every } => every <= 1 || index % every as u64 == 0,
        }
    }
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::EveryFrame
    }
}

/// Encoded frame format written to scratch storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Png,
    Jpeg,
}

impl FrameFormat {
    /// File extension used for scratch frames
    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Png => "png",
            FrameFormat::Jpeg => "jpg",
        }
    }

    /// Codec the transcoder is asked to emit
    pub fn codec(&self) -> &'static str {
        match self {
            FrameFormat::Png => "png",
            FrameFormat::Jpeg => "mjpeg",
        }
    }
}

/// Configuration for the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Capture frame rate, frames per second
    pub frame_rate: u32,

    /// Seconds without a detected subject before a recording stops
    pub timeout_seconds: u32,

    /// Transcoder output size, `WIDTHxHEIGHT`
    pub resolution: String,

    /// Root directory for finished clips
    pub output_dir: PathBuf,

    /// Root directory for per-session scratch directories
    pub scratch_dir: PathBuf,

    /// Frame selection for classification
    #[serde(default)]
    pub classification: ClassificationPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            frame_rate: 9,
            timeout_seconds: 4,
            resolution: "1920x1080".to_string(),
            output_dir: PathBuf::from("captures"),
            scratch_dir: std::env::temp_dir(),
            classification: ClassificationPolicy::EveryFrame,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_FRAME_RATE) {
            config.frame_rate = parse_positive(ENV_FRAME_RATE, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECONDS) {
            config.timeout_seconds = parse_positive(ENV_TIMEOUT_SECONDS, &value)?;
        }
        if let Some(value) = lookup(ENV_RESOLUTION) {
            config.resolution = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_SCRATCH_DIR) {
            config.scratch_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_SAMPLE_DETECTION) {
            if value.trim().eq_ignore_ascii_case("true") {
                // One sample per second of footage
                config.classification = ClassificationPolicy::Sampled {
                    every: config.frame_rate,
                };
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the session controller relies on
    pub fn validate(&self) -> AppResult<()> {
        if self.frame_rate == 0 {
            return Err(AppError::Config("frame rate must be positive".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(AppError::Config("timeout must be positive".to_string()));
        }
        if let ClassificationPolicy::Sampled { every: 0 } = self.classification {
            return Err(AppError::Config("sampling interval must be positive".to_string()));
        }
        self.dimensions()?;
        Ok(())
    }

    /// Output resolution as `(width, height)`
    pub fn dimensions(&self) -> AppResult<(u32, u32)> {
        let invalid = || AppError::Config(format!("invalid resolution: {:?}", self.resolution));
        let (width, height) = self.resolution.split_once('x').ok_or_else(invalid)?;
        let width: u32 = width.parse().map_err(|_| invalid())?;
        let height: u32 = height.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok((width, height))
    }

    /// Consecutive absent classifications that end a recording
    pub fn absence_threshold(&self) -> u32 {
        let frames = self.frame_rate.saturating_mul(self.timeout_seconds);
        match self.classification {
            ClassificationPolicy::EveryFrame => frames,
            ClassificationPolicy::Sampled { every } => frames.div_ceil(every.max(1)),
        }
    }
}

fn parse_positive(key: &str, value: &str) -> AppResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(AppError::Config(format!(
            "{} must be a positive integer, got {:?}",
            key, value
        ))),
    }
}
