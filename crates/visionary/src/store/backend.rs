//! Persistence backends for the knowledge base.
//!
//! The JSON backend keeps three files in one directory:
//!
//! - `selectors.json`: `"{pageUrl}-{elementName}"` to learned record
//! - `history.json`: execution records, oldest first
//! - `learning-report.json`: the last derived report
//!
//! Writers take `selectors.json.lock` for the whole read-merge-write cycle.
//! The two data files are read independently: an unparseable one counts as
//! empty and, before it is overwritten, is kept aside as `<name>.corrupt`.

use super::{ExecutionRecord, LearnedElementRecord};
use crate::result::{VisionaryError, VisionaryResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument, warn};

/// Records file name
pub const SELECTORS_FILE: &str = "selectors.json";
/// History file name
pub const HISTORY_FILE: &str = "history.json";
/// Report file name
pub const REPORT_FILE: &str = "learning-report.json";
/// Lock file name
pub const LOCK_FILE: &str = "selectors.json.lock";

/// Everything a backend stores
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeSnapshot {
    /// Learned records by record key
    pub records: BTreeMap<String, LearnedElementRecord>,
    /// Execution history, oldest first
    pub history: Vec<ExecutionRecord>,
}

/// Storage behind a [`super::SelectorCandidateStore`]
pub trait KnowledgeBackend: Send + Sync + fmt::Debug {
    /// Read the stored snapshot; nothing stored yet is an empty snapshot
    fn load(&self) -> VisionaryResult<KnowledgeSnapshot>;

    /// Atomically replace the stored snapshot with `apply(current)`.
    ///
    /// Implementations hold exclusive access for the whole call.
    fn update(
        &self,
        apply: &mut dyn FnMut(KnowledgeSnapshot) -> KnowledgeSnapshot,
    ) -> VisionaryResult<KnowledgeSnapshot>;

    /// Store the derived learning report
    fn write_report(&self, report: &Value) -> VisionaryResult<()>;

    /// Where the data lives, for log lines
    fn location(&self) -> String;
}

// =============================================================================
// LOCKING
// =============================================================================

/// Lock acquisition policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles up to 500ms
    pub initial_backoff: Duration,
    /// A lock file older than this is taken over
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(25),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Held lock file; removed on drop
#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path, options: LockOptions) -> VisionaryResult<Self> {
        let mut backoff = options.initial_backoff;
        for attempt in 1..=options.max_attempts.max(1) {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %path.display(), attempt, "knowledge lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path, options.stale_after) {
                        warn!(path = %path.display(), "taking over stale knowledge lock");
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(500));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(VisionaryError::knowledge(format!(
            "knowledge base is locked by another writer ({})",
            path.display()
        )))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not release knowledge lock");
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

// =============================================================================
// JSON FILE BACKEND
// =============================================================================

/// Knowledge base as JSON files in one directory
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
    lock: LockOptions,
}

impl JsonFileBackend {
    /// Backend rooted at `dir`; the directory is created on first save
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: LockOptions::default(),
        }
    }

    /// Override the lock policy
    #[must_use]
    pub const fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    /// Knowledge base directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_snapshot(&self, quarantine: bool) -> VisionaryResult<KnowledgeSnapshot> {
        Ok(KnowledgeSnapshot {
            records: read_json_lenient(&self.dir.join(SELECTORS_FILE), quarantine)?,
            history: read_json_lenient(&self.dir.join(HISTORY_FILE), quarantine)?,
        })
    }
}

impl KnowledgeBackend for JsonFileBackend {
    fn load(&self) -> VisionaryResult<KnowledgeSnapshot> {
        self.read_snapshot(false)
    }

    #[instrument(skip(self, apply), fields(dir = %self.dir.display()))]
    fn update(
        &self,
        apply: &mut dyn FnMut(KnowledgeSnapshot) -> KnowledgeSnapshot,
    ) -> VisionaryResult<KnowledgeSnapshot> {
        fs::create_dir_all(&self.dir)?;
        let _guard = LockGuard::acquire(&self.dir.join(LOCK_FILE), self.lock)?;

        let current = self.read_snapshot(true)?;
        let next = apply(current);

        write_json_atomic(&self.dir.join(SELECTORS_FILE), &next.records)?;
        write_json_atomic(&self.dir.join(HISTORY_FILE), &next.history)?;
        debug!(
            records = next.records.len(),
            history = next.history.len(),
            "knowledge saved"
        );
        Ok(next)
    }

    fn write_report(&self, report: &Value) -> VisionaryResult<()> {
        fs::create_dir_all(&self.dir)?;
        write_json_atomic(&self.dir.join(REPORT_FILE), report)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> VisionaryResult<T> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(T::default()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Parse errors yield the default; with `quarantine` the bad file is copied
/// to `<name>.corrupt` first
fn read_json_lenient<T: DeserializeOwned + Default>(
    path: &Path,
    quarantine: bool,
) -> VisionaryResult<T> {
    match read_json_or_default(path) {
        Err(VisionaryError::Json(e)) => {
            warn!(path = %path.display(), error = %e, "unparseable knowledge file, treating it as empty");
            if quarantine {
                let mut aside = path.as_os_str().to_owned();
                aside.push(".corrupt");
                if let Err(e) = fs::copy(path, &aside) {
                    warn!(path = %path.display(), error = %e, "could not keep corrupt knowledge file");
                }
            }
            Ok(T::default())
        }
        other => other,
    }
}

/// Write JSON to a sibling temp file, then rename over `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> VisionaryResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let data = serde_json::to_string_pretty(value)?;
    if let Err(e) = fs::write(&tmp_path, data).and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

// =============================================================================
// MEMORY BACKEND
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    snapshot: KnowledgeSnapshot,
    report: Option<Value>,
    saves: usize,
}

/// In-process backend; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-filled with a snapshot
    #[must_use]
    pub fn with_snapshot(snapshot: KnowledgeSnapshot) -> Self {
        let backend = Self::default();
        backend.lock().snapshot = snapshot;
        backend
    }

    /// Current stored snapshot
    #[must_use]
    pub fn snapshot(&self) -> KnowledgeSnapshot {
        self.lock().snapshot.clone()
    }

    /// Last written report
    #[must_use]
    pub fn report(&self) -> Option<Value> {
        self.lock().report.clone()
    }

    /// Completed saves
    #[must_use]
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KnowledgeBackend for MemoryBackend {
    fn load(&self) -> VisionaryResult<KnowledgeSnapshot> {
        Ok(self.snapshot())
    }

    fn update(
        &self,
        apply: &mut dyn FnMut(KnowledgeSnapshot) -> KnowledgeSnapshot,
    ) -> VisionaryResult<KnowledgeSnapshot> {
        let mut state = self.lock();
        let next = apply(std::mem::take(&mut state.snapshot));
        state.snapshot = next.clone();
        state.saves += 1;
        Ok(next)
    }

    fn write_report(&self, report: &Value) -> VisionaryResult<()> {
        self.lock().report = Some(report.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
