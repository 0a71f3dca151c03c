//! In-memory adapter.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{AdapterError, AdapterResult, FilesystemAdapter};

/// Adapter operations, used to inspect calls and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`FilesystemAdapter::create_subvolume`]
    Create,
    /// [`FilesystemAdapter::snapshot`]
    Snapshot,
    /// [`FilesystemAdapter::delete_subvolume`]
    Delete,
    /// [`FilesystemAdapter::mount`]
    Mount,
    /// [`FilesystemAdapter::unmount`]
    Unmount,
    /// [`FilesystemAdapter::created_at`]
    CreatedAt,
}

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCall {
    /// Which operation was invoked.
    pub operation: Operation,
    /// Target path (destination for snapshots).
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct State {
    subvolumes: HashMap<PathBuf, DateTime<Utc>>,
    mounted: HashSet<PathBuf>,
    calls: Vec<AdapterCall>,
    fail_next: HashSet<Operation>,
}

/// Filesystem adapter backed by in-memory state.
///
/// Clones share state, so a test can hand one clone to the driver and keep
/// another to inspect calls, delete subvolumes behind the driver's back, or
/// make the next call of an operation fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    state: Arc<Mutex<State>>,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail.
    pub fn fail_next(&self, operation: Operation) {
        self.state.lock().fail_next.insert(operation);
    }

    /// All calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls made for `operation`.
    #[must_use]
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Whether `path` is currently mounted.
    #[must_use]
    pub fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().mounted.contains(path)
    }

    /// Drop a subvolume without going through the adapter interface.
    pub fn discard(&self, path: &Path) {
        let mut state = self.state.lock();
        state.subvolumes.remove(path);
        state.mounted.remove(path);
    }

    /// Record a call and consume a pending injected failure.
    fn record(state: &mut State, operation: Operation, path: &Path) -> AdapterResult<()> {
        state.calls.push(AdapterCall {
            operation,
            path: path.to_path_buf(),
        });
        if state.fail_next.remove(&operation) {
            return Err(AdapterError::new(format!(
                "injected {operation:?} failure on {}",
                path.display()
            )));
        }
        Ok(())
    }
}

impl FilesystemAdapter for MemoryAdapter {
    fn create_subvolume(&self, path: &Path) -> AdapterResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, Operation::Create, path)?;
        if state.subvolumes.contains_key(path) {
            return Err(AdapterError::new(format!("{} exists", path.display())));
        }
        state.subvolumes.insert(path.to_path_buf(), Utc::now());
        Ok(())
    }

    fn snapshot(&self, source: &Path, dest: &Path) -> AdapterResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, Operation::Snapshot, dest)?;
        if !state.subvolumes.contains_key(source) {
            return Err(AdapterError::new(format!(
                "{} is not a subvolume",
                source.display()
            )));
        }
        if state.subvolumes.contains_key(dest) {
            return Err(AdapterError::new(format!("{} exists", dest.display())));
        }
        state.subvolumes.insert(dest.to_path_buf(), Utc::now());
        Ok(())
    }

    fn delete_subvolume(&self, path: &Path) -> AdapterResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, Operation::Delete, path)?;
        if state.subvolumes.remove(path).is_none() {
            return Err(AdapterError::new(format!(
                "{} is not a subvolume",
                path.display()
            )));
        }
        Ok(())
    }

    fn mount(&self, path: &Path) -> AdapterResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, Operation::Mount, path)?;
        if !state.subvolumes.contains_key(path) {
            return Err(AdapterError::new(format!(
                "{} does not exist",
                path.display()
            )));
        }
        if !state.mounted.insert(path.to_path_buf()) {
            return Err(AdapterError::new(format!(
                "{} is already mounted",
                path.display()
            )));
        }
        Ok(())
    }

    fn unmount(&self, path: &Path) -> AdapterResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, Operation::Unmount, path)?;
        state.mounted.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.lock().subvolumes.contains_key(path)
    }

    fn created_at(&self, path: &Path) -> AdapterResult<DateTime<Utc>> {
        let mut state = self.state.lock();
        Self::record(&mut state, Operation::CreatedAt, path)?;
        state
            .subvolumes
            .get(path)
            .copied()
            .ok_or_else(|| AdapterError::new(format!("{} does not exist", path.display())))
    }
}
