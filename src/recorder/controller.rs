//! Session controller
//!
//! Owns the map from source id to session and drives each session through
//! `Idle -> Recording -> Draining -> Idle`. Every transition for a source
//! goes through `&mut self`, so a source never has two transitions in flight.

use super::collaborators::{AssembleRequest, Collaborators, FramePayload, FrameProducer};
use super::state::{ClipSummary, RecordingSession, SessionState};
use crate::config::{FrameFormat, MonitorConfig};
use crate::sequencer::{FrameReorderer, FrameSequencer, PassThrough};
use crate::stream::StreamDemuxer;
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

/// Upper bound on frame writes in flight for one session
pub const MAX_PENDING_WRITES: usize = 64;

/// How frames for a session are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Ordered PNG byte stream (`image2pipe`)
    ByteStream,
    /// Individual JPEG files announced in no particular order (`image2`)
    FileNotification,
}

impl SourceKind {
    pub fn format(&self) -> FrameFormat {
        match self {
            SourceKind::ByteStream => FrameFormat::Png,
            SourceKind::FileNotification => FrameFormat::Jpeg,
        }
    }

    fn reorderer(&self) -> Box<dyn FrameReorderer<FramePayload>> {
        match self {
            SourceKind::ByteStream => Box::new(PassThrough::new()),
            SourceKind::FileNotification => Box::new(FrameSequencer::new()),
        }
    }
}

/// Result of a start trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session for the source was already running; nothing changed
    AlreadyActive,
}

/// Result of delivering input to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Still recording
    Continue,
    /// This input ended the recording; call `finalize`
    StopRequested,
    /// Session was already stopping; frames were persisted only
    Draining,
    /// No session for the source
    Ignored,
}

/// Events emitted as sessions change state
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session started recording
    Started { source_id: String },
    /// The absence timeout or an external stop ended recording
    StopRequested { source_id: String },
    /// Assembly finished and scratch data was removed
    Finished(ClipSummary),
    /// The session was torn down without a clip
    Aborted { source_id: String },
}

struct ActiveSession {
    session: RecordingSession,
    kind: SourceKind,
    producer: Arc<dyn FrameProducer>,
    demuxer: StreamDemuxer,
    reorderer: Box<dyn FrameReorderer<FramePayload>>,
    pending_writes: JoinSet<AppResult<()>>,
    /// Last sequence number assigned on the byte-stream path
    last_sequence: u64,
}

impl ActiveSession {
    fn new(session: RecordingSession, kind: SourceKind, producer: Arc<dyn FrameProducer>) -> Self {
        Self {
            session,
            kind,
            producer,
            demuxer: StreamDemuxer::new(),
            reorderer: kind.reorderer(),
            pending_writes: JoinSet::new(),
            last_sequence: 0,
        }
    }

    /// Queue a frame write without awaiting it
    async fn queue_write(
        &mut self,
        collaborators: &Collaborators,
        sequence: u64,
        bytes: Arc<[u8]>,
    ) -> AppResult<()> {
        while self.pending_writes.len() >= MAX_PENDING_WRITES {
            if let Some(result) = self.pending_writes.join_next().await {
                flatten_write(result)?;
            }
        }
        let path = self.session.frame_path(sequence);
        let storage = Arc::clone(&collaborators.storage);
        self.pending_writes
            .spawn(async move { storage.write_frame(&path, &bytes).await });
        Ok(())
    }

    /// Wait for every queued write. Returns the first failure, if any,
    /// but only after all writes have settled.
    async fn wait_for_writes(&mut self) -> AppResult<()> {
        let mut first_error = None;
        while let Some(result) = self.pending_writes.join_next().await {
            if let Err(e) = flatten_write(result) {
                tracing::error!("{}: Frame write failed: {}", self.session.source_id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn flatten_write(result: Result<AppResult<()>, JoinError>) -> AppResult<()> {
    result.map_err(|e| AppError::Storage(format!("frame write task failed: {}", e)))?
}

/// Per-source recording state machine
pub struct SessionController {
    config: MonitorConfig,
    collaborators: Collaborators,
    sessions: HashMap<String, ActiveSession>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Create a controller with no active sessions
    pub fn new(config: MonitorConfig, collaborators: Collaborators) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            collaborators,
            sessions: HashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// State of the session for `source_id`; `Idle` if there is none
    pub fn state(&self, source_id: &str) -> SessionState {
        self.sessions
            .get(source_id)
            .map(|active| active.session.state)
            .unwrap_or_default()
    }

    /// The running session for `source_id`, if any
    pub fn session(&self, source_id: &str) -> Option<&RecordingSession> {
        self.sessions.get(source_id).map(|active| &active.session)
    }

    /// Sources with a session in progress
    pub fn active_sources(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Frame producer of the session for `source_id`
    pub fn producer(&self, source_id: &str) -> Option<Arc<dyn FrameProducer>> {
        self.sessions
            .get(source_id)
            .map(|active| Arc::clone(&active.producer))
    }

    /// Check that the byte stream for `source_id` ended on an image boundary
    pub fn finish_stream(&self, source_id: &str) -> AppResult<()> {
        match self.sessions.get(source_id) {
            Some(active) => active.demuxer.finish(),
            None => Ok(()),
        }
    }

    /// Handle a start trigger for `source_id`.
    ///
    /// Ignored while a session for the source is Recording or Draining.
    pub async fn trigger_start(
        &mut self,
        source_id: &str,
        kind: SourceKind,
        producer: Arc<dyn FrameProducer>,
    ) -> AppResult<StartOutcome> {
        if let Some(active) = self.sessions.get(source_id) {
            tracing::warn!(
                "{}: Start trigger ignored, session {} is {:?}",
                source_id,
                active.session.id,
                active.session.state
            );
            return Ok(StartOutcome::AlreadyActive);
        }

        tracing::info!("{}: Motion started", source_id);

        let scratch_dir = self.collaborators.storage.create_scratch(source_id).await?;
        tracing::debug!("{}: Created {:?}", source_id, scratch_dir);

        let session = RecordingSession::new(source_id, scratch_dir.clone(), kind.format());
        self.sessions.insert(
            source_id.to_string(),
            ActiveSession::new(session, kind, Arc::clone(&producer)),
        );

        if let Err(e) = producer.start(&scratch_dir).await {
            tracing::error!("{}: Producer failed to start: {}", source_id, e);
            if let Err(cleanup) = self.abort(source_id).await {
                tracing::warn!("{}: Cleanup after failed start: {}", source_id, cleanup);
            }
            return Err(e);
        }

        let _ = self.event_tx.send(SessionEvent::Started {
            source_id: source_id.to_string(),
        });
        Ok(StartOutcome::Started)
    }

    /// Feed transcoder output for a byte-stream session
    pub async fn ingest_bytes(&mut self, source_id: &str, bytes: &[u8]) -> AppResult<FrameOutcome> {
        let Some(active) = self.sessions.get_mut(source_id) else {
            tracing::debug!("{}: Dropping {} bytes, no session", source_id, bytes.len());
            return Ok(FrameOutcome::Ignored);
        };
        if active.kind != SourceKind::ByteStream {
            return Err(AppError::Session(format!(
                "{}: byte input for a {:?} session",
                source_id, active.kind
            )));
        }

        for image in active.demuxer.feed(bytes)? {
            active.last_sequence += 1;
            active
                .reorderer
                .push(active.last_sequence, FramePayload::Encoded(Arc::from(image)));
        }

        let outcome = process_ready(&self.config, &self.collaborators, active).await?;
        self.announce(source_id, outcome);
        Ok(outcome)
    }

    /// Deliver one announced frame file for a file-notification session
    pub async fn ingest_frame(
        &mut self,
        source_id: &str,
        sequence: u64,
        payload: FramePayload,
    ) -> AppResult<FrameOutcome> {
        let Some(active) = self.sessions.get_mut(source_id) else {
            tracing::debug!("{}: Dropping frame {}, no session", source_id, sequence);
            return Ok(FrameOutcome::Ignored);
        };
        if active.kind != SourceKind::FileNotification {
            return Err(AppError::Session(format!(
                "{}: frame input for a {:?} session",
                source_id, active.kind
            )));
        }

        active.reorderer.push(sequence, payload);
        let outcome = process_ready(&self.config, &self.collaborators, active).await?;
        self.announce(source_id, outcome);
        Ok(outcome)
    }

    /// External stop signal. A no-op when the source is Idle or already Draining.
    pub async fn request_stop(&mut self, source_id: &str) -> AppResult<FrameOutcome> {
        let Some(active) = self.sessions.get_mut(source_id) else {
            return Ok(FrameOutcome::Ignored);
        };
        if active.session.state == SessionState::Draining {
            return Ok(FrameOutcome::Draining);
        }
        tracing::info!("{}: Stop requested", source_id);
        active.session.state = SessionState::Draining;
        active.producer.stop().await?;
        self.announce(source_id, FrameOutcome::StopRequested);
        Ok(FrameOutcome::StopRequested)
    }

    /// Drain, assemble and clean up the session for `source_id`.
    ///
    /// The scratch directory is removed and the source released even when
    /// a write or the assembler fails. Returns `None` when there was no
    /// session or it captured no frames.
    pub async fn finalize(&mut self, source_id: &str) -> AppResult<Option<ClipSummary>> {
        let Some(mut active) = self.sessions.remove(source_id) else {
            return Ok(None);
        };

        let stopped = if active.session.state == SessionState::Recording {
            active.session.state = SessionState::Draining;
            active.producer.stop().await
        } else {
            Ok(())
        };

        let outcome = self.assemble_session(&mut active).await;

        let scratch_dir = &active.session.scratch_dir;
        let cleanup = self.collaborators.storage.remove_dir_all(scratch_dir).await;
        match &cleanup {
            Ok(()) => tracing::debug!("{}: Removed {:?}", source_id, scratch_dir),
            Err(e) => tracing::error!("{}: Failed to remove {:?}: {}", source_id, scratch_dir, e),
        }
        tracing::info!("{}: Session {} closed", source_id, active.session.id);

        let summary = outcome?;
        stopped?;
        cleanup?;
        match &summary {
            Some(clip) => {
                let _ = self.event_tx.send(SessionEvent::Finished(clip.clone()));
            }
            None => {
                let _ = self.event_tx.send(SessionEvent::Aborted {
                    source_id: source_id.to_string(),
                });
            }
        }
        Ok(summary)
    }

    /// Tear down a session without assembling it
    pub async fn abort(&mut self, source_id: &str) -> AppResult<()> {
        let Some(mut active) = self.sessions.remove(source_id) else {
            return Ok(());
        };
        tracing::warn!("{}: Aborting session {}", source_id, active.session.id);

        if let Err(e) = active.producer.stop().await {
            tracing::warn!("{}: Producer stop failed: {}", source_id, e);
        }
        if let Err(e) = active.wait_for_writes().await {
            tracing::warn!("{}: Discarding failed writes: {}", source_id, e);
        }
        let _ = self.event_tx.send(SessionEvent::Aborted {
            source_id: source_id.to_string(),
        });
        self.collaborators
            .storage
            .remove_dir_all(&active.session.scratch_dir)
            .await
    }

    fn announce(&self, source_id: &str, outcome: FrameOutcome) {
        if outcome == FrameOutcome::StopRequested {
            let _ = self.event_tx.send(SessionEvent::StopRequested {
                source_id: source_id.to_string(),
            });
        }
    }

    async fn assemble_session(&self, active: &mut ActiveSession) -> AppResult<Option<ClipSummary>> {
        let source_id = active.session.source_id.clone();

        let held_back = active.reorderer.pending();
        if held_back > 0 {
            tracing::warn!("{}: {} out-of-order frames never released", source_id, held_back);
        }
        if active.demuxer.has_partial() {
            tracing::debug!(
                "{}: Discarding {} bytes of a partial image",
                source_id,
                active.demuxer.pending_bytes()
            );
        }

        // The assembler must only see a complete set of frame files
        active.wait_for_writes().await?;

        let session = &active.session;
        if session.frames_written == 0 {
            tracing::warn!("{}: No frames captured, skipping assembly", source_id);
            return Ok(None);
        }

        let ended_at = Utc::now();
        let output_dir = session.output_dir(&self.config.output_dir);
        self.collaborators.storage.create_dir(&output_dir).await?;

        let request = AssembleRequest {
            frame_dir: session.scratch_dir.clone(),
            output_dir,
            basename: session.basename(ended_at),
            frame_rate: self.config.frame_rate,
            extension: session.format.extension().to_string(),
        };
        tracing::info!(
            "{}: Assembling {} frames into {:?}/{}",
            source_id,
            session.frames_written,
            request.output_dir,
            request.basename
        );
        let output_path = self.collaborators.assembler.assemble(&request).await?;

        Ok(Some(ClipSummary {
            session_id: session.id,
            source_id,
            output_path,
            frames_written: session.frames_written,
            duration_secs: session.captured_secs(self.config.frame_rate),
            started_at: session.started_at,
            ended_at,
        }))
    }
}

/// Persist and classify every frame the reorderer releases, in order
async fn process_ready(
    config: &MonitorConfig,
    collaborators: &Collaborators,
    active: &mut ActiveSession,
) -> AppResult<FrameOutcome> {
    let threshold = config.absence_threshold();
    let mut stop_requested = false;

    for (sequence, payload) in active.reorderer.drain() {
        active.session.frames_written += 1;
        if let FramePayload::Encoded(bytes) = &payload {
            active
                .queue_write(collaborators, sequence, Arc::clone(bytes))
                .await?;
        }

        // Once draining, frames are only persisted
        if active.session.state != SessionState::Recording
            || !config.classification.should_classify(sequence)
        {
            continue;
        }

        let image: Arc<[u8]> = match payload {
            FramePayload::Encoded(bytes) => bytes,
            FramePayload::Stored(path) => Arc::from(collaborators.storage.read_frame(&path).await?),
        };
        let present = collaborators.detector.classify(&image)?;
        tracing::debug!(
            "{}: frame {} present={}",
            active.session.source_id,
            sequence,
            present
        );

        if active.session.record_classification(present, threshold) {
            active.session.state = SessionState::Draining;
            tracing::info!(
                "{}: Subject disappeared. Stopping video after {:.1} seconds",
                active.session.source_id,
                active.session.captured_secs(config.frame_rate)
            );
            active.producer.stop().await?;
            stop_requested = true;
        }
    }

    Ok(match active.session.state {
        _ if stop_requested => FrameOutcome::StopRequested,
        SessionState::Draining => FrameOutcome::Draining,
        _ => FrameOutcome::Continue,
    })
}
