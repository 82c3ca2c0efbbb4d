// Undo/redo history of snapshot files

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::constants::SNAPSHOT_EXTENSION;
use crate::core::error::{DepthError, Result};
use crate::snapshot::format::{read_snapshot, write_snapshot, SnapshotData, SnapshotEntry};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SnapshotRecord {
    pub path: PathBuf,
    pub description: String,
    pub series_count: usize,
}

#[derive(Debug, Default)]
struct HistoryState {
    records: Vec<SnapshotRecord>,
    current: Option<usize>,
}

struct Inner {
    dir: PathBuf,
    max: usize,
    state: Mutex<HistoryState>,
    in_progress: AtomicBool,
    cancel: Arc<AtomicBool>,
}

/// Shared handle to the snapshot history. One save or restore runs at a time.
#[derive(Clone)]
pub struct SnapshotHistory {
    inner: Arc<Inner>,
}

/// Clears the in-progress flag when the operation ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("failed to remove snapshot {}: {}", path.display(), e);
    }
}

fn join_error(e: tokio::task::JoinError) -> DepthError {
    DepthError::Io(std::io::Error::other(e.to_string()))
}

impl SnapshotHistory {
    pub fn new(dir: impl Into<PathBuf>, max: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("snapshots directory: {}", dir.display());

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                max: max.max(1),
                state: Mutex::new(HistoryState::default()),
                in_progress: AtomicBool::new(false),
                cancel: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        self.inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                warn!("snapshot operation rejected: another one is in progress");
                DepthError::Busy
            })?;
        self.inner.cancel.store(false, Ordering::Release);
        Ok(BusyGuard(&self.inner.in_progress))
    }

    pub fn is_busy(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Asks the running save or restore to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::Release);
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn can_undo(&self) -> bool {
        !self.is_busy() && self.state().current.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        let state = self.state();
        !self.is_busy() && state.current.is_some_and(|c| c + 1 < state.records.len())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state().current
    }

    pub fn records(&self) -> Vec<SnapshotRecord> {
        self.state().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Saves a new snapshot after the current one, dropping any redo history.
    ///
    /// Series without samples are skipped. Returns the index of the new snapshot.
    pub async fn create<F>(&self, entries: Vec<SnapshotEntry>, description: &str, mut progress: F) -> Result<usize>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let _busy = self.begin()?;

        let entries: Vec<SnapshotEntry> = entries
            .into_iter()
            .filter(|e| !e.timestamps.is_empty() && !e.values.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(DepthError::Precondition("Empty series list".to_string()));
        }

        let (path, description) = {
            let mut state = self.state();
            let keep = state.current.map_or(0, |c| c + 1);
            for dropped in state.records.drain(keep..) {
                remove_file(&dropped.path);
            }

            let description = if description.is_empty() {
                format!("Version {}", state.records.len() + 1)
            } else {
                description.to_string()
            };
            let name = format!("snapshot_{}.{}", Uuid::new_v4(), SNAPSHOT_EXTENSION);
            (self.inner.dir.join(name), description)
        };

        let data = SnapshotData { description, entries };
        let series_count = data.entries.len();
        let cancel = Arc::clone(&self.inner.cancel);
        let target = path.clone();

        let data = tokio::task::spawn_blocking(move || {
            write_snapshot(&target, &data, &mut progress, &cancel).map(|_| data)
        })
        .await
        .map_err(join_error)??;

        let mut state = self.state();
        state.records.push(SnapshotRecord {
            path,
            description: data.description,
            series_count,
        });

        let excess = state.records.len().saturating_sub(self.inner.max);
        for old in state.records.drain(..excess) {
            remove_file(&old.path);
        }
        if excess > 0 {
            debug!("evicted {} old snapshots", excess);
        }

        let index = state.records.len() - 1;
        state.current = Some(index);
        info!("snapshot {} saved: {}", index, state.records[index].description);
        Ok(index)
    }

    /// Loads snapshot `index` and makes it current.
    pub async fn restore<F>(&self, index: usize, mut progress: F) -> Result<SnapshotData>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let _busy = self.begin()?;

        let path = {
            let state = self.state();
            state
                .records
                .get(index)
                .map(|r| r.path.clone())
                .ok_or_else(|| DepthError::Precondition(format!("Invalid snapshot index {index}")))?
        };

        let cancel = Arc::clone(&self.inner.cancel);
        let data = tokio::task::spawn_blocking(move || read_snapshot(&path, &mut progress, &cancel))
            .await
            .map_err(join_error)??;

        let mut state = self.state();
        if index < state.records.len() {
            state.current = Some(index);
        }
        info!("snapshot {} restored: {} series", index, data.entries.len());
        Ok(data)
    }

    /// Restores the previous snapshot, or `None` when there is nothing to undo.
    pub async fn undo<F>(&self, progress: F) -> Result<Option<SnapshotData>>
    where
        F: FnMut(u8) + Send + 'static,
    {
        if !self.can_undo() {
            return Ok(None);
        }
        let target = self.state().current.map_or(0, |c| c.saturating_sub(1));
        self.restore(target, progress).await.map(Some)
    }

    pub async fn redo<F>(&self, progress: F) -> Result<Option<SnapshotData>>
    where
        F: FnMut(u8) + Send + 'static,
    {
        if !self.can_redo() {
            return Ok(None);
        }
        let target = self.state().current.map_or(0, |c| c + 1);
        self.restore(target, progress).await.map(Some)
    }

    /// Deletes every snapshot file and forgets the history.
    pub fn clear_history(&self) {
        let mut state = self.state();
        for record in state.records.drain(..) {
            remove_file(&record.path);
        }
        state.current = None;
        info!("snapshot history cleared");
    }
}
