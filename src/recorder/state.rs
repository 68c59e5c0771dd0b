//! Recording state management
//!
//! Defines the per-source session state machine and session tracking.

use crate::config::FrameFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle of one source's recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session for this source
    #[default]
    Idle,
    /// Frames are being persisted and classified
    Recording,
    /// Stop decided; waiting on writes, then assembly and cleanup
    Draining,
}

/// One motion-triggered recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Unique session ID
    pub id: Uuid,

    /// Source (camera) this session records
    pub source_id: String,

    /// Wall-clock time the start trigger was accepted
    pub started_at: DateTime<Utc>,

    /// Scratch directory holding frame files
    pub scratch_dir: PathBuf,

    /// Format of the frame files in scratch
    pub format: FrameFormat,

    /// Frames released to the session so far
    pub frames_written: u64,

    /// Frames handed to the detector so far
    pub frames_classified: u64,

    /// Current run of classifications without the subject
    pub consecutive_absent_frames: u32,

    pub state: SessionState,
}

impl RecordingSession {
    /// Create a session in the Recording state, starting now
    pub fn new(source_id: &str, scratch_dir: PathBuf, format: FrameFormat) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            started_at: Utc::now(),
            scratch_dir,
            format,
            frames_written: 0,
            frames_classified: 0,
            consecutive_absent_frames: 0,
            state: SessionState::Recording,
        }
    }

    /// Path of frame `index` (1-based) inside the scratch directory
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.scratch_dir
            .join(format!("frame_{:04}.{}", index, self.format.extension()))
    }

    /// Apply one classification result.
    ///
    /// Returns true exactly when the absence run reaches `threshold`.
    pub fn record_classification(&mut self, present: bool, threshold: u32) -> bool {
        self.frames_classified += 1;
        if present {
            self.consecutive_absent_frames = 0;
            return false;
        }
        self.consecutive_absent_frames += 1;
        self.consecutive_absent_frames == threshold
    }

    /// Seconds of footage captured at `frame_rate`
    pub fn captured_secs(&self, frame_rate: u32) -> f64 {
        self.frames_written as f64 / frame_rate.max(1) as f64
    }

    /// Clip basename, `<start_ms>_<end_ms>`
    pub fn basename(&self, ended_at: DateTime<Utc>) -> String {
        format!(
            "{}_{}",
            self.started_at.timestamp_millis(),
            ended_at.timestamp_millis()
        )
    }

    /// Per-day output directory under `root`, keyed by the start date
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(self.started_at.format("%Y-%m-%d").to_string())
    }
}

/// Result of a finished recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipSummary {
    pub session_id: Uuid,
    pub source_id: String,

    /// Assembled video file
    pub output_path: PathBuf,

    pub frames_written: u64,

    /// Footage length at the configured frame rate
    pub duration_secs: f64,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
