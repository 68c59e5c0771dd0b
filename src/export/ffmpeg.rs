//! FFmpeg wrappers for frame production and clip assembly
//!
//! The transcoder turns a camera stream into frames (PNG on stdout, or JPEG
//! files in the scratch directory). The assembler stitches a directory of
//! frames back into an H.264 MP4.

use crate::config::{FrameFormat, MonitorConfig};
use crate::recorder::collaborators::{AssembleRequest, Assembler, FrameProducer};
use crate::recorder::controller::SourceKind;
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};

/// Default FFmpeg executable, resolved through PATH
pub const FFMPEG: &str = "ffmpeg";

/// How often a running transcoder is checked for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Assembles `frame_%04d.<ext>` files into `<output_dir>/<basename>.mp4`
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    program: PathBuf,
}

impl FfmpegAssembler {
    pub fn new() -> Self {
        Self::with_program(FFMPEG)
    }

    /// Use a specific FFmpeg binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Output file for `request`
    pub fn output_path(request: &AssembleRequest) -> PathBuf {
        request.output_dir.join(format!("{}.mp4", request.basename))
    }

    /// FFmpeg arguments for `request`
    pub fn build_args(request: &AssembleRequest) -> Vec<String> {
        let pattern = request
            .frame_dir
            .join(format!("frame_%04d.{}", request.extension));
        vec![
            "-y".to_string(),
            "-framerate".to_string(),
            request.frame_rate.to_string(),
            "-i".to_string(),
            pattern.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            Self::output_path(request).to_string_lossy().to_string(),
        ]
    }
}

impl Default for FfmpegAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Assembler for FfmpegAssembler {
    async fn assemble(&self, request: &AssembleRequest) -> AppResult<PathBuf> {
        let args = Self::build_args(request);
        tracing::info!("Executing: {:?} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Assembler(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Assembler(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(Self::output_path(request))
    }
}

/// Transcodes a camera stream into frames for one session
pub struct FfmpegTranscoder {
    program: PathBuf,
    input: String,
    resolution: String,
    frame_rate: u32,
    kind: SourceKind,
    child: Mutex<Option<Child>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl FfmpegTranscoder {
    /// Transcoder for `input` (file path or stream URL)
    pub fn new(input: impl Into<String>, config: &MonitorConfig, kind: SourceKind) -> Self {
        Self {
            program: PathBuf::from(FFMPEG),
            input: input.into(),
            resolution: config.resolution.clone(),
            frame_rate: config.frame_rate,
            kind,
            child: Mutex::new(None),
            stdout: Mutex::new(None),
        }
    }

    /// Use a specific FFmpeg binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// FFmpeg arguments for a session using `scratch_dir`
    pub fn build_args(&self, scratch_dir: &Path) -> Vec<String> {
        let format: FrameFormat = self.kind.format();
        let (muxer, target) = match self.kind {
            SourceKind::ByteStream => ("image2pipe", "pipe:1".to_string()),
            SourceKind::FileNotification => (
                "image2",
                scratch_dir
                    .join(format!("frame_%04d.{}", format.extension()))
                    .to_string_lossy()
                    .to_string(),
            ),
        };
        vec![
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            self.input.clone(),
            "-vcodec".to_string(),
            format.codec().to_string(),
            "-s".to_string(),
            self.resolution.clone(),
            "-f".to_string(),
            muxer.to_string(),
            "-r".to_string(),
            self.frame_rate.to_string(),
            target,
        ]
    }

    /// Frame bytes for a byte-stream session; available once after `start`
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.stdout.lock().take()
    }

    /// True once the child has exited or was never started
    fn has_exited(&self) -> AppResult<bool> {
        let mut child = self.child.lock();
        let Some(child) = child.as_mut() else {
            return Ok(true);
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!("FFmpeg transcoder exited: {}", status);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(AppError::Transcoder(format!(
                "Failed to poll FFmpeg transcoder: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl FrameProducer for FfmpegTranscoder {
    async fn start(&self, scratch_dir: &Path) -> AppResult<()> {
        if self.child.lock().is_some() {
            return Ok(());
        }

        let args = self.build_args(scratch_dir);
        tracing::info!("Starting FFmpeg transcoder: {:?}", args);

        let stdout = match self.kind {
            SourceKind::ByteStream => Stdio::piped(),
            SourceKind::FileNotification => Stdio::null(),
        };
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Transcoder(format!("Failed to start FFmpeg transcoder: {}", e)))?;

        *self.stdout.lock() = child.stdout.take();
        *self.child.lock() = Some(child);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let child = self.child.lock().take();
        let Some(mut child) = child else {
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            // Already exited on its own
            tracing::debug!("FFmpeg transcoder kill: {}", e);
        }
        let status = child
            .wait()
            .await
            .map_err(|e| AppError::Transcoder(format!("Failed to reap FFmpeg transcoder: {}", e)))?;
        tracing::debug!("FFmpeg transcoder stopped: {}", status);
        Ok(())
    }

    async fn exited(&self) -> AppResult<()> {
        while !self.has_exited()? {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        Ok(())
    }
}
