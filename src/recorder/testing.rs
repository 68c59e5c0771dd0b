//! In-memory collaborators for controller and pipeline tests

use super::collaborators::{AssembleRequest, Assembler, Collaborators, Detector, FrameProducer, FrameStorage};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub fn collaborators(
    detector: Arc<ScriptedDetector>,
    storage: Arc<MemoryStorage>,
    assembler: Arc<FakeAssembler>,
) -> Collaborators {
    Collaborators {
        detector,
        storage,
        assembler,
    }
}

/// Answers from a fixed script, then `false`
#[derive(Default)]
pub struct ScriptedDetector {
    script: Mutex<VecDeque<bool>>,
    seen: Mutex<Vec<Vec<u8>>>,
    fail_after: Mutex<Option<usize>>,
}

impl ScriptedDetector {
    pub fn new(script: &[bool]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Fail every call after the first `calls` successful ones
    pub fn fail_after(&self, calls: usize) {
        *self.fail_after.lock() = Some(calls);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn seen_first_bytes(&self) -> Vec<u8> {
        self.seen
            .lock()
            .iter()
            .filter_map(|image| image.first().copied())
            .collect()
    }
}

impl Detector for ScriptedDetector {
    fn classify(&self, image: &[u8]) -> AppResult<bool> {
        if let Some(limit) = *self.fail_after.lock() {
            if self.calls() >= limit {
                return Err(AppError::Detector("model crashed".to_string()));
            }
        }
        self.seen.lock().push(image.to_vec());
        Ok(self.script.lock().pop_front().unwrap_or(false))
    }
}

/// Filesystem stand-in with optionally slow writes
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<HashSet<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
    scratch_created: AtomicUsize,
    write_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing_file: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn with_write_delay(write_delay: Option<Duration>) -> Self {
        Self {
            write_delay,
            ..Self::default()
        }
    }

    pub fn insert(&self, path: &Path, bytes: Vec<u8>) {
        self.files.lock().insert(path.to_path_buf(), bytes);
    }

    pub fn frames_stored(&self) -> usize {
        self.files.lock().len()
    }

    pub fn scratch_created(&self) -> usize {
        self.scratch_created.load(Ordering::SeqCst)
    }

    pub fn was_removed(&self, path: &Path) -> bool {
        self.removed.lock().iter().any(|p| p == path)
    }

    pub fn removed_count(&self) -> usize {
        self.removed.lock().len()
    }

    /// Most writes that were ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Make the write of the file called `name` fail immediately
    pub fn fail_write_of(&self, name: &str) {
        *self.failing_file.lock() = Some(name.to_string());
    }
}

#[async_trait]
impl FrameStorage for MemoryStorage {
    async fn create_scratch(&self, source_id: &str) -> AppResult<PathBuf> {
        let n = self.scratch_created.fetch_add(1, Ordering::SeqCst);
        let dir = PathBuf::from(format!("/scratch/{}-{}", source_id.replace(' ', "_"), n));
        self.dirs.lock().insert(dir.clone());
        Ok(dir)
    }

    async fn create_dir(&self, path: &Path) -> AppResult<()> {
        self.dirs.lock().insert(path.to_path_buf());
        Ok(())
    }

    async fn write_frame(&self, path: &Path, bytes: &[u8]) -> AppResult<()> {
        let failing = self.failing_file.lock().clone();
        if failing.is_some_and(|name| path.ends_with(&name)) {
            return Err(AppError::Storage(format!("disk full writing {:?}", path)));
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.files.lock().insert(path.to_path_buf(), bytes.to_vec());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_frame(&self, path: &Path) -> AppResult<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("no such frame: {:?}", path)))
    }

    async fn remove_dir_all(&self, path: &Path) -> AppResult<()> {
        self.dirs.lock().remove(path);
        self.files.lock().retain(|file, _| !file.starts_with(path));
        self.removed.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// Records assembly requests and how many frames existed at call time
pub struct FakeAssembler {
    storage: Arc<MemoryStorage>,
    requests: Mutex<Vec<AssembleRequest>>,
    visible: Mutex<Vec<usize>>,
    fail: AtomicBool,
}

impl FakeAssembler {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            requests: Mutex::new(Vec::new()),
            visible: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<AssembleRequest> {
        self.requests.lock().clone()
    }

    pub fn frames_visible_at_call(&self) -> Vec<usize> {
        self.visible.lock().clone()
    }
}

#[async_trait]
impl Assembler for FakeAssembler {
    async fn assemble(&self, request: &AssembleRequest) -> AppResult<PathBuf> {
        self.requests.lock().push(request.clone());
        self.visible.lock().push(self.storage.frames_stored());
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(AppError::Assembler("encoder exited with status 1".to_string()));
        }
        Ok(request
            .output_dir
            .join(format!("{}.mp4", request.basename)))
    }
}

/// Counts start and stop requests
#[derive(Default)]
pub struct FakeProducer {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
    has_exited: AtomicBool,
    exit: Notify,
}

impl FakeProducer {
    /// Behave as if the producer ran out of input
    pub fn finish(&self) {
        self.has_exited.store(true, Ordering::SeqCst);
        self.exit.notify_waiters();
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameProducer for FakeProducer {
    async fn start(&self, _scratch_dir: &Path) -> AppResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(AppError::Transcoder("camera offline".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish();
        Ok(())
    }

    async fn exited(&self) -> AppResult<()> {
        loop {
            let notified = self.exit.notified();
            if self.has_exited.load(Ordering::SeqCst) {
                return Ok(());
            }
            notified.await;
        }
    }
}
