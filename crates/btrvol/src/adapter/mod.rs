//! Filesystem adapter.
//!
//! The registry never touches subvolumes directly. Every physical effect
//! (create, snapshot, delete, mount, unmount) and every metadata lookup goes
//! through a [`FilesystemAdapter`], which is invoked statelessly with
//! explicit paths:
//! - [`BtrfsCli`] drives the `btrfs` tool and the mount syscalls
//! - [`MemoryAdapter`] keeps everything in memory and records each call

mod btrfs;
mod memory;

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use btrfs::BtrfsCli;
pub use memory::{AdapterCall, MemoryAdapter, Operation};

/// Failure reported by a filesystem adapter, carrying its diagnostic output.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AdapterError {
    /// Diagnostic text (tool output or OS error).
    pub message: String,
}

impl AdapterError {
    /// Create an adapter error from diagnostic text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Physical subvolume and mount operations.
///
/// Implementations hold no volume state of their own; they act on the paths
/// they are given. All calls are synchronous and run while the registry's
/// write lock is held.
pub trait FilesystemAdapter: Send + Sync {
    /// Create an empty subvolume at `path`.
    fn create_subvolume(&self, path: &Path) -> AdapterResult<()>;

    /// Create a copy-on-write snapshot of `source` at `dest`.
    fn snapshot(&self, source: &Path, dest: &Path) -> AdapterResult<()>;

    /// Delete the subvolume at `path`.
    fn delete_subvolume(&self, path: &Path) -> AdapterResult<()>;

    /// Make the subvolume at `path` available to consumers.
    fn mount(&self, path: &Path) -> AdapterResult<()>;

    /// Undo [`FilesystemAdapter::mount`].
    ///
    /// A path that is not mounted counts as already unmounted: counts are
    /// restored from disk across reboots, mounts are not.
    fn unmount(&self, path: &Path) -> AdapterResult<()>;

    /// Whether anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Creation time of the subvolume at `path`. May be approximate.
    fn created_at(&self, path: &Path) -> AdapterResult<DateTime<Utc>>;
}
