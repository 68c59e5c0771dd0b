//! Collaborator interfaces
//!
//! The session controller talks to the outside world only through these
//! traits: the frame producer (transcoder), the detector, frame storage and
//! the clip assembler.

use crate::utils::error::AppResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Classifies a single encoded image as "subject present"
pub trait Detector: Send + Sync {
    /// Synchronous and possibly CPU-heavy. Errors are session-fatal.
    fn classify(&self, image: &[u8]) -> AppResult<bool>;
}

impl<F> Detector for F
where
    F: Fn(&[u8]) -> AppResult<bool> + Send + Sync,
{
    fn classify(&self, image: &[u8]) -> AppResult<bool> {
        self(image)
    }
}

/// Upstream source of frames for one session
#[async_trait]
pub trait FrameProducer: Send + Sync {
    /// Begin producing. File-based producers write into `scratch_dir`.
    async fn start(&self, scratch_dir: &Path) -> AppResult<()>;

    /// Stop producing. Must be a no-op if already stopped.
    async fn stop(&self) -> AppResult<()>;

    /// Resolves once the producer has exited on its own or was stopped.
    /// Every frame it wrote is complete by then.
    async fn exited(&self) -> AppResult<()>;
}

/// Filesystem operations used by a session
#[async_trait]
pub trait FrameStorage: Send + Sync {
    /// Create a fresh scratch directory for `source_id`
    async fn create_scratch(&self, source_id: &str) -> AppResult<PathBuf>;

    /// Create a directory and its parents; succeeds if it already exists
    async fn create_dir(&self, path: &Path) -> AppResult<()>;

    async fn write_frame(&self, path: &Path, bytes: &[u8]) -> AppResult<()>;

    async fn read_frame(&self, path: &Path) -> AppResult<Vec<u8>>;

    /// Remove a directory tree; succeeds if it is already gone
    async fn remove_dir_all(&self, path: &Path) -> AppResult<()>;
}

/// Parameters for one assembly run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleRequest {
    /// Directory holding `frame_%04d.<extension>` files
    pub frame_dir: PathBuf,
    pub output_dir: PathBuf,
    pub basename: String,
    pub frame_rate: u32,
    /// Extension of the frame files
    pub extension: String,
}

/// Turns a directory of frames into a video file
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Returns the path of the produced file. Failures are not retried.
    async fn assemble(&self, request: &AssembleRequest) -> AppResult<PathBuf>;
}

/// A frame as released to the controller
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Encoded image bytes that still need to be persisted
    Encoded(Arc<[u8]>),
    /// Image already written to scratch by the producer
    Stored(PathBuf),
}

/// Collaborators shared by every session of a controller
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn Detector>,
    pub storage: Arc<dyn FrameStorage>,
    pub assembler: Arc<dyn Assembler>,
}
