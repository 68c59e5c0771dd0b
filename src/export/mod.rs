//! External process collaborators
//!
//! FFmpeg-backed frame producer and clip assembler, and a detector that
//! delegates to an external program.

pub mod detector;
pub mod ffmpeg;

pub use detector::CommandDetector;
pub use ffmpeg::{FfmpegAssembler, FfmpegTranscoder};
