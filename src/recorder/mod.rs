//! Recording system module
//!
//! This module implements motion-triggered recording:
//! - Collaborator traits for the producer, detector, storage and assembler
//! - SessionController to run one session per source
//! - Drivers for the byte-stream and file-notification frame sources

pub mod collaborators;
pub mod controller;
pub mod pipeline;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use collaborators::{
    AssembleRequest, Assembler, Collaborators, Detector, FramePayload, FrameProducer, FrameStorage,
};
pub use controller::{FrameOutcome, SessionController, SessionEvent, SourceKind, StartOutcome};
pub use pipeline::{run_byte_stream, run_frame_notifications, FrameFile, TruncationPolicy};
pub use state::{ClipSummary, RecordingSession, SessionState};
