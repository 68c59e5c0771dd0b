//! Command-line interface

use crate::config::MonitorConfig;
use crate::export::{CommandDetector, FfmpegAssembler, FfmpegTranscoder};
use crate::recorder::{
    run_byte_stream, run_frame_notifications, AssembleRequest, Assembler, ClipSummary,
    Collaborators, SessionController, SourceKind, StartOutcome, TruncationPolicy,
};
use crate::storage::{FrameWatcher, FsStorage};
use crate::stream::StreamDemuxer;
use crate::utils::{AppError, ErrorResponse};
use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Parser)]
#[command(name = "clipwatch")]
#[command(about = "Record camera clips for as long as a person is in view")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split a PNG image2pipe stream into numbered image files
    Split {
        /// Read from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
        /// Directory for image_NNNN.png files
        #[arg(long)]
        out: PathBuf,
    },
    /// Assemble a directory of frame_NNNN files into an MP4
    Stitch {
        #[arg(long)]
        frames: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "png")]
        ext: String,
        /// Defaults to FRAMES_PER_SECOND
        #[arg(long)]
        fps: Option<u32>,
    },
    /// Record one session from a camera stream until the subject leaves
    Record {
        /// Source name, used for scratch naming and logs
        #[arg(long)]
        source: String,
        /// Camera stream URL or video file
        #[arg(long)]
        input: String,
        /// Detector command; receives each frame on stdin, exits 0 if present
        #[arg(long)]
        detector: String,
        #[arg(long, value_enum, default_value_t = FrameDelivery::Pipe)]
        delivery: FrameDelivery,
        /// Fail instead of finalizing if the stream ends inside an image
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrameDelivery {
    /// PNG frames over the transcoder's stdout
    Pipe,
    /// JPEG files written into the scratch directory
    Files,
}

impl From<FrameDelivery> for SourceKind {
    fn from(delivery: FrameDelivery) -> Self {
        match delivery {
            FrameDelivery::Pipe => SourceKind::ByteStream,
            FrameDelivery::Files => SourceKind::FileNotification,
        }
    }
}

/// Run the parsed command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Split { input, out } => {
            let count = match input {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("opening {}", path.display()))?;
                    split_stream(file, &out).await?
                }
                None => split_stream(tokio::io::stdin(), &out).await?,
            };
            println!("{} images written to {}", count, out.display());
        }
        Command::Stitch {
            frames,
            out,
            name,
            ext,
            fps,
        } => {
            let config = MonitorConfig::from_env()?;
            tokio::fs::create_dir_all(&out).await?;
            let request = AssembleRequest {
                frame_dir: frames,
                output_dir: out,
                basename: name,
                frame_rate: fps.unwrap_or(config.frame_rate),
                extension: ext,
            };
            let path = FfmpegAssembler::new().assemble(&request).await?;
            println!("{}", path.display());
        }
        Command::Record {
            source,
            input,
            detector,
            delivery,
            strict,
        } => {
            let config = MonitorConfig::from_env()?;
            let summary =
                match record(config, &source, &input, &detector, delivery.into(), strict).await {
                    Ok(summary) => summary,
                    Err(err) => match err.downcast::<AppError>() {
                        Ok(error) => {
                            let response = ErrorResponse::from(error);
                            println!("{}", serde_json::to_string_pretty(&response)?);
                            bail!("{}: {}", source, response.message);
                        }
                        Err(err) => return Err(err),
                    },
                };
            match summary {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => tracing::warn!("{}: No clip was produced", source),
            }
        }
    }
    Ok(())
}

/// Demultiplex `reader` into `out/image_NNNN.png`, returning the image count
pub async fn split_stream<R>(mut reader: R, out: &Path) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin,
{
    tokio::fs::create_dir_all(out).await?;
    let mut demuxer = StreamDemuxer::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut count = 0u64;

    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        for image in demuxer.feed(&buf[..read])? {
            count += 1;
            let path = out.join(format!("image_{:04}.png", count));
            tokio::fs::write(&path, &image)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    if demuxer.has_partial() {
        tracing::warn!(
            "Input ended inside an image; {} bytes dropped",
            demuxer.pending_bytes()
        );
    }
    Ok(count)
}

async fn record(
    config: MonitorConfig,
    source: &str,
    input: &str,
    detector: &str,
    kind: SourceKind,
    strict: bool,
) -> anyhow::Result<Option<ClipSummary>> {
    let storage = Arc::new(FsStorage::new(config.scratch_dir.clone()));
    let collaborators = Collaborators {
        detector: Arc::new(CommandDetector::parse(detector)?),
        storage,
        assembler: Arc::new(FfmpegAssembler::new()),
    };
    let transcoder = Arc::new(FfmpegTranscoder::new(input, &config, kind));
    let mut controller = SessionController::new(config, collaborators);

    if controller
        .trigger_start(source, kind, transcoder.clone())
        .await?
        == StartOutcome::AlreadyActive
    {
        bail!("{} is already recording", source);
    }
    let scratch_dir = controller
        .session(source)
        .map(|session| session.scratch_dir.clone())
        .ok_or_else(|| anyhow!("session for {} vanished after start", source))?;

    let run = drive(&mut controller, &transcoder, source, kind, &scratch_dir, strict);
    let finished = tokio::select! {
        result = run => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(result) => result,
        None => {
            tracing::info!("{}: Interrupted, finalizing", source);
            Ok(controller.finalize(source).await?)
        }
    }
}

async fn drive(
    controller: &mut SessionController,
    transcoder: &FfmpegTranscoder,
    source: &str,
    kind: SourceKind,
    scratch_dir: &Path,
    strict: bool,
) -> anyhow::Result<Option<ClipSummary>> {
    let summary = match kind {
        SourceKind::ByteStream => {
            let stdout = transcoder
                .take_stdout()
                .ok_or_else(|| anyhow!("transcoder has no stdout"))?;
            let truncation = if strict {
                TruncationPolicy::Fail
            } else {
                TruncationPolicy::Finalize
            };
            run_byte_stream(controller, source, stdout, truncation).await?
        }
        SourceKind::FileNotification => {
            let (_watcher, announcements) = FrameWatcher::watch(scratch_dir).await?;
            let extension = kind.format().extension();
            run_frame_notifications(controller, source, extension, announcements).await?
        }
    };
    Ok(summary)
}
