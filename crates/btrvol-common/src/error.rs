//! Error types shared by the btrvol crates.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BtrvolError`].
pub type BtrvolResult<T> = Result<T, BtrvolError>;

/// Errors returned by volume lifecycle operations.
#[derive(Error, Diagnostic, Debug)]
pub enum BtrvolError {
    /// Volume not found.
    #[error("No such volume: {name}")]
    #[diagnostic(code(btrvol::volume::not_found))]
    NotFound {
        /// The volume name that was not found.
        name: String,
    },

    /// Volume is still held by at least one consumer.
    #[error("Volume {name} is still mounted by {count} consumer(s)")]
    #[diagnostic(
        code(btrvol::volume::still_mounted),
        help("Stop the containers using this volume before removing it")
    )]
    StillMounted {
        /// The volume name.
        name: String,
        /// Current mount count.
        count: u64,
    },

    /// Volume is the origin of one or more snapshots.
    #[error("Volume {name} has dependent snapshots: {}", .snapshots.join(", "))]
    #[diagnostic(
        code(btrvol::volume::has_snapshots),
        help("Remove the snapshots first")
    )]
    HasDependentSnapshots {
        /// The origin volume name.
        name: String,
        /// Names of the snapshots referencing it.
        snapshots: Vec<String>,
    },

    /// The filesystem adapter failed to create, snapshot or delete a subvolume.
    #[error("Filesystem operation '{operation}' failed on {}: {output}", .path.display())]
    #[diagnostic(code(btrvol::fs::operation_failed))]
    FilesystemOperationFailed {
        /// Adapter operation name.
        operation: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Diagnostic output from the adapter.
        output: String,
    },

    /// Physical mount failed.
    #[error("Failed to mount volume {name}: {reason}")]
    #[diagnostic(code(btrvol::mount::failed))]
    MountFailed {
        /// The volume name.
        name: String,
        /// Diagnostic output from the adapter.
        reason: String,
    },

    /// Physical unmount failed.
    #[error("Failed to unmount volume {name}: {reason}")]
    #[diagnostic(code(btrvol::mount::unmount_failed))]
    UnmountFailed {
        /// The volume name.
        name: String,
        /// Diagnostic output from the adapter.
        reason: String,
    },

    /// Writing or reading the state document failed.
    #[error("Failed to persist volume state to {}: {reason}", .path.display())]
    #[diagnostic(
        code(btrvol::persistence),
        help("In-memory state is ahead of disk until the next successful save")
    )]
    PersistenceFailed {
        /// The state document path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// Creation timestamp lookup failed.
    #[error("Metadata unavailable for volume {name}: {reason}")]
    #[diagnostic(code(btrvol::volume::metadata_unavailable))]
    MetadataUnavailable {
        /// The volume name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// Volume name cannot be used as a path component.
    #[error("Invalid volume name: {name:?}")]
    #[diagnostic(
        code(btrvol::volume::invalid_name),
        help("Volume names must be non-empty and must not contain '/' or be '.' or '..'")
    )]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Another volume already owns the mount point a new volume would use.
    #[error("Cannot create {name}: mount point {} belongs to {owner}", .mountpoint.display())]
    #[diagnostic(
        code(btrvol::volume::mountpoint_in_use),
        help("The state document holds a record whose mount point does not match its name")
    )]
    MountpointInUse {
        /// The volume being created.
        name: String,
        /// The contested mount point.
        mountpoint: PathBuf,
        /// The volume already registered there.
        owner: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(btrvol::io))]
    Io(#[from] std::io::Error),
}

impl BtrvolError {
    /// Whether this error means the named volume does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BtrvolError::NotFound {
            name: "data".to_string(),
        };
        assert_eq!(err.to_string(), "No such volume: data");
        assert!(err.is_not_found());
    }

    #[test]
    fn dependent_snapshots_are_listed() {
        let err = BtrvolError::HasDependentSnapshots {
            name: "base".to_string(),
            snapshots: vec!["snap1".to_string(), "snap2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Volume base has dependent snapshots: snap1, snap2"
        );
    }

    #[test]
    fn mountpoint_collision_names_owner() {
        let err = BtrvolError::MountpointInUse {
            name: "b".to_string(),
            mountpoint: PathBuf::from("/h/b"),
            owner: "a".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot create b: mount point /h/b belongs to a"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BtrvolError = io_err.into();
        assert!(matches!(err, BtrvolError::Io(_)));
        assert!(!err.is_not_found());
    }
}
