//! Session drivers
//!
//! Connect a frame source to the session controller and run one session to
//! completion. Both drivers share the controller's classification and drain
//! logic; only frame delivery differs.

use super::collaborators::FramePayload;
use super::controller::{FrameOutcome, SessionController};
use super::state::ClipSummary;
use crate::utils::error::AppResult;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Read size for transcoder output
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long to wait for late announcements after the producer exits
pub const SETTLE_WINDOW: Duration = Duration::from_millis(250);

/// What to do when the byte stream ends inside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncationPolicy {
    /// Drop the partial image and assemble what was captured
    #[default]
    Finalize,
    /// Abort the session with a stream error
    Fail,
}

/// Drive a byte-stream session from `reader` until it stops or the input ends
pub async fn run_byte_stream<R>(
    controller: &mut SessionController,
    source_id: &str,
    mut reader: R,
    truncation: TruncationPolicy,
) -> AppResult<Option<ClipSummary>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(read) => read,
            Err(e) => {
                abort_quietly(controller, source_id).await;
                return Err(e.into());
            }
        };

        if read == 0 {
            if let Err(e) = controller.finish_stream(source_id) {
                tracing::warn!("{}: {}", source_id, e);
                if truncation == TruncationPolicy::Fail {
                    abort_quietly(controller, source_id).await;
                    return Err(e);
                }
            }
            tracing::info!("{}: Frame stream closed", source_id);
            return controller.finalize(source_id).await;
        }

        match controller.ingest_bytes(source_id, &buf[..read]).await {
            Ok(FrameOutcome::StopRequested) => return controller.finalize(source_id).await,
            Ok(FrameOutcome::Ignored) => return Ok(None),
            Ok(FrameOutcome::Continue | FrameOutcome::Draining) => {}
            Err(e) => {
                abort_quietly(controller, source_id).await;
                return Err(e);
            }
        }
    }
}

/// A frame file announced by the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    pub sequence: u64,
    pub path: PathBuf,
}

impl FrameFile {
    /// Parse `frame_NNNN.<extension>` (at least four digits)
    pub fn parse(path: &Path, extension: &str) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (stem, ext) = name.strip_prefix("frame_")?.rsplit_once('.')?;
        if ext != extension || stem.len() < 4 || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            sequence: stem.parse().ok()?,
            path: path.to_path_buf(),
        })
    }
}

/// Holds back the newest announced frame until it is known to be complete.
///
/// The producer writes frames in sequence, so a frame is complete once a
/// later one has been announced or the producer has exited.
#[derive(Debug, Default)]
pub struct FrameGate {
    newest: Option<FrameFile>,
}

impl FrameGate {
    /// Record an announcement; returns a frame that is now safe to read
    pub fn announce(&mut self, frame: FrameFile) -> Option<FrameFile> {
        let held = self.newest.as_ref().map(|newest| newest.sequence);
        match held {
            Some(held) if frame.sequence == held => None,
            Some(held) if frame.sequence < held => Some(frame),
            _ => self.newest.replace(frame),
        }
    }

    /// Release the held frame once the producer is done writing
    pub fn flush(&mut self) -> Option<FrameFile> {
        self.newest.take()
    }
}

/// Drive a file-notification session from announced paths until it stops,
/// the announcement channel closes, or the producer exits
pub async fn run_frame_notifications(
    controller: &mut SessionController,
    source_id: &str,
    extension: &str,
    mut announcements: mpsc::Receiver<PathBuf>,
) -> AppResult<Option<ClipSummary>> {
    let Some(producer) = controller.producer(source_id) else {
        tracing::debug!("{}: No session to deliver frames to", source_id);
        return Ok(None);
    };
    let exited = async move { producer.exited().await };
    tokio::pin!(exited);

    let mut gate = FrameGate::default();
    let mut producer_running = true;

    loop {
        let announced = if producer_running {
            tokio::select! {
                announced = announcements.recv() => announced,
                result = &mut exited => {
                    producer_running = false;
                    match result {
                        Ok(()) => tracing::info!("{}: Frame producer exited", source_id),
                        Err(e) => tracing::warn!("{}: Frame producer failed: {}", source_id, e),
                    }
                    continue;
                }
            }
        } else {
            // Pick up announcements still in flight from the watcher
            tokio::time::timeout(SETTLE_WINDOW, announcements.recv())
                .await
                .unwrap_or(None)
        };
        let Some(path) = announced else {
            break;
        };

        let Some(frame) = FrameFile::parse(&path, extension) else {
            tracing::debug!("{}: Ignoring {:?}", source_id, path);
            continue;
        };
        if let Some(ready) = gate.announce(frame) {
            if let Some(done) = deliver(controller, source_id, ready).await {
                return done;
            }
        }
    }

    if let Some(last) = gate.flush() {
        if let Some(done) = deliver(controller, source_id, last).await {
            return done;
        }
    }
    tracing::info!("{}: Frame delivery ended", source_id);
    controller.finalize(source_id).await
}

/// Hand one complete frame to the controller. Returns the driver's result
/// when the session is over.
async fn deliver(
    controller: &mut SessionController,
    source_id: &str,
    frame: FrameFile,
) -> Option<AppResult<Option<ClipSummary>>> {
    let outcome = controller
        .ingest_frame(source_id, frame.sequence, FramePayload::Stored(frame.path))
        .await;
    match outcome {
        Ok(FrameOutcome::StopRequested) => Some(controller.finalize(source_id).await),
        Ok(FrameOutcome::Ignored) => Some(Ok(None)),
        Ok(FrameOutcome::Continue | FrameOutcome::Draining) => None,
        Err(e) => {
            abort_quietly(controller, source_id).await;
            Some(Err(e))
        }
    }
}

async fn abort_quietly(controller: &mut SessionController, source_id: &str) {
    if let Err(e) = controller.abort(source_id).await {
        tracing::error!("{}: Cleanup failed: {}", source_id, e);
    }
}
