use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::MirrorError;
use crate::formats::{ProgressStatus, ThreadProgress, local_timestamp};

pub type ProgressMap = BTreeMap<String, ThreadProgress>;

pub trait ProgressBackend: Send {
    fn load(&self) -> anyhow::Result<ProgressMap>;
    fn save(&self, threads: &ProgressMap) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    _lock: LockFile,
}

impl JsonFileBackend {
    /// Claims `<path>.lock` for the lifetime of the backend; a second writer is refused.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MirrorError> {
        let path = path.into();
        let lock = LockFile::acquire(lock_path(&path))?;
        Ok(Self { path, _lock: lock })
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: PathBuf) -> Result<Self, MirrorError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", std::process::id()) {
                    tracing::debug!(path = %path.display(), ?err, "could not write lock owner");
                }
                Ok(Self { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(MirrorError::ProgressLocked { path })
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), ?err, "could not remove progress lock");
        }
    }
}

impl ProgressBackend for JsonFileBackend {
    fn load(&self) -> anyhow::Result<ProgressMap> {
        Ok(crate::json_file::read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, threads: &ProgressMap) -> anyhow::Result<()> {
        crate::json_file::write_json_atomic(&self.path, threads).map_err(|source| {
            MirrorError::Persistence {
                path: self.path.clone(),
                source,
            }
            .into()
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    threads: ProgressMap,
    saves: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(threads: ProgressMap) -> Self {
        let backend = Self::default();
        if let Ok(mut state) = backend.inner.lock() {
            state.threads = threads;
        }
        backend
    }

    pub fn snapshot(&self) -> ProgressMap {
        self.inner
            .lock()
            .map(|state| state.threads.clone())
            .unwrap_or_default()
    }

    pub fn saves(&self) -> usize {
        self.inner.lock().map(|state| state.saves).unwrap_or(0)
    }
}

impl ProgressBackend for MemoryBackend {
    fn load(&self) -> anyhow::Result<ProgressMap> {
        let state = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        Ok(state.threads.clone())
    }

    fn save(&self, threads: &ProgressMap) -> anyhow::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        state.threads = threads.clone();
        state.saves += 1;
        Ok(())
    }
}

pub struct ProgressStore {
    backend: Box<dyn ProgressBackend>,
    threads: ProgressMap,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    pub fn open(backend: impl ProgressBackend + 'static) -> Self {
        let threads = match backend.load() {
            Ok(threads) => threads,
            Err(err) => {
                tracing::warn!(?err, "could not read progress state; starting empty");
                ProgressMap::new()
            }
        };
        Self {
            backend: Box::new(backend),
            threads,
        }
    }

    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self, MirrorError> {
        Ok(Self::open(JsonFileBackend::open(path)?))
    }

    pub fn entry(&self, thread_url: &str) -> Option<&ThreadProgress> {
        self.threads.get(thread_url)
    }

    pub fn threads(&self) -> &ProgressMap {
        &self.threads
    }

    pub fn get_or_create(&mut self, thread_url: &str) -> &ThreadProgress {
        self.entry_mut(thread_url)
    }

    pub fn set_out_dir(&mut self, thread_url: &str, out_dir: &Path) {
        self.entry_mut(thread_url).out_dir = Some(out_dir.to_path_buf());
        self.persist();
    }

    pub fn set_total_pages(&mut self, thread_url: &str, total_pages: u32) {
        self.entry_mut(thread_url).total_pages = total_pages;
        self.persist();
    }

    pub fn mark_page_complete(&mut self, thread_url: &str, page: u32) {
        let entry = self.entry_mut(thread_url);
        entry.completed_pages.insert(page);
        entry.status = ProgressStatus::InProgress;
        entry.last_run = Some(local_timestamp());
        self.persist();
    }

    pub fn record_asset_failure(&mut self, thread_url: &str, asset_url: &str, page: u32) {
        self.entry_mut(thread_url)
            .failed_assets
            .insert(asset_url.to_owned(), page);
        self.persist();
    }

    pub fn clear_failures_for_page(&mut self, thread_url: &str, page: u32) {
        let entry = self.entry_mut(thread_url);
        let before = entry.failed_assets.len();
        entry.failed_assets.retain(|_, failed_page| *failed_page != page);
        if entry.failed_assets.len() != before {
            self.persist();
        }
    }

    pub fn mark_in_progress(&mut self, thread_url: &str) {
        self.entry_mut(thread_url).status = ProgressStatus::InProgress;
        self.persist();
    }

    /// Marks the thread complete. Refused while any page in `1..=total_pages` is missing.
    pub fn mark_thread_complete(&mut self, thread_url: &str, total_pages: u32) -> bool {
        let entry = self.entry_mut(thread_url);
        if !entry.covers_all_pages(total_pages) {
            tracing::warn!(
                thread = thread_url,
                total_pages,
                completed = entry.completed_pages.len(),
                "not all pages are complete; leaving thread in progress"
            );
            return false;
        }
        entry.status = ProgressStatus::Complete;
        entry.total_pages = total_pages;
        entry.last_run = Some(local_timestamp());
        self.persist();
        true
    }

    pub fn threads_with_failures(&self) -> Vec<ThreadProgress> {
        self.threads
            .values()
            .filter(|entry| !entry.failed_assets.is_empty())
            .cloned()
            .collect()
    }

    pub fn tracked_threads(&self) -> Vec<ThreadProgress> {
        self.threads
            .values()
            .filter(|entry| {
                matches!(
                    entry.status,
                    ProgressStatus::InProgress | ProgressStatus::Complete
                ) && entry.out_dir.is_some()
            })
            .cloned()
            .collect()
    }

    fn entry_mut(&mut self, thread_url: &str) -> &mut ThreadProgress {
        self.threads
            .entry(thread_url.to_owned())
            .or_insert_with(|| ThreadProgress::new(thread_url))
    }

    fn persist(&self) {
        if let Err(err) = self.backend.save(&self.threads) {
            tracing::warn!(?err, "could not save progress; continuing without durable tracking");
        }
    }
}
