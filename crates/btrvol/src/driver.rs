//! Volume lifecycle operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use btrvol_common::{BtrvolError, BtrvolPaths, BtrvolResult, validate_name};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::adapter::{AdapterError, FilesystemAdapter};
use crate::mount::Transition;
use crate::registry::{Registry, VolumeRecord};
use crate::store::PersistenceStore;

/// Create option naming the origin of a snapshot volume.
pub const SNAPSHOT_OPTION: &str = "snapshot";

/// A volume as returned by [`VolumeDriver::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    /// Volume name.
    pub name: String,
    /// Subvolume location.
    pub mountpoint: PathBuf,
}

/// A volume as returned by [`VolumeDriver::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Subvolume location.
    pub mountpoint: PathBuf,
    /// Approximate creation time of the subvolume.
    pub created_at: DateTime<Utc>,
}

/// Visibility of volumes created by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Volumes exist on this host only.
    Local,
}

impl Scope {
    /// Protocol spelling of the scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }
}

/// Driver capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Volume scope.
    pub scope: Scope,
}

/// Copy-on-write volume driver.
///
/// Every mutating operation takes the registry write lock for its whole
/// duration, including the adapter call and the state save, so operations
/// are serialized and state is persisted only after the filesystem change
/// succeeded.
pub struct VolumeDriver {
    paths: BtrvolPaths,
    adapter: Box<dyn FilesystemAdapter>,
    store: Box<dyn PersistenceStore>,
    registry: RwLock<Registry>,
}

impl std::fmt::Debug for VolumeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDriver")
            .field("paths", &self.paths)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl VolumeDriver {
    /// Create a driver with an empty registry.
    pub fn new(
        paths: BtrvolPaths,
        adapter: impl FilesystemAdapter + 'static,
        store: impl PersistenceStore + 'static,
    ) -> Self {
        Self {
            paths,
            adapter: Box::new(adapter),
            store: Box::new(store),
            registry: RwLock::new(Registry::new()),
        }
    }

    /// Create a driver and restore the registry from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if a saved document exists but cannot be loaded.
    pub fn open(
        paths: BtrvolPaths,
        adapter: impl FilesystemAdapter + 'static,
        store: impl PersistenceStore + 'static,
    ) -> BtrvolResult<Self> {
        let driver = Self::new(paths, adapter, store);
        if let Some(document) = driver.store.load()? {
            let registry = Registry::from_document(document);
            tracing::info!(volumes = registry.len(), "Restored volume registry");
            *driver.registry.write() = registry;
        }
        Ok(driver)
    }

    /// Create a volume, or do nothing if the name is taken.
    ///
    /// With a non-empty `snapshot` option the volume is a snapshot of the
    /// named volume, otherwise an empty subvolume. An existing volume is
    /// left untouched even if it was created with different options.
    ///
    /// # Errors
    ///
    /// - [`BtrvolError::InvalidName`] if `name` is not a single path component
    /// - [`BtrvolError::MountpointInUse`] if a loaded record already owns the mount point
    /// - [`BtrvolError::NotFound`] if the snapshot origin is not registered; a
    ///   snapshot must always name a registered origin
    /// - [`BtrvolError::FilesystemOperationFailed`] if the adapter fails; nothing is recorded
    /// - [`BtrvolError::PersistenceFailed`] if the save fails; the volume stays registered
    pub fn create(&self, name: &str, options: &HashMap<String, String>) -> BtrvolResult<()> {
        validate_name(name)?;

        let mut registry = self.registry.write();
        if registry.contains(name) {
            tracing::debug!(name, "Volume already exists");
            return Ok(());
        }

        let mountpoint = self.paths.mountpoint(name);
        if let Some(owner) = registry.mountpoint_owner(&mountpoint) {
            return Err(BtrvolError::MountpointInUse {
                name: name.to_string(),
                owner: owner.to_string(),
                mountpoint,
            });
        }

        let origin = options
            .get(SNAPSHOT_OPTION)
            .map(String::as_str)
            .filter(|origin| !origin.is_empty());

        let record = match origin {
            Some(origin) => {
                let source = registry
                    .get(origin)
                    .ok_or_else(|| BtrvolError::NotFound {
                        name: origin.to_string(),
                    })?
                    .mountpoint
                    .clone();
                self.adapter
                    .snapshot(&source, &mountpoint)
                    .map_err(|e| fs_failed("snapshot", &mountpoint, e))?;
                VolumeRecord::snapshot(name, mountpoint, origin)
            }
            None => {
                self.adapter
                    .create_subvolume(&mountpoint)
                    .map_err(|e| fs_failed("create", &mountpoint, e))?;
                VolumeRecord::plain(name, mountpoint)
            }
        };

        tracing::info!(
            name,
            path = %record.mountpoint.display(),
            source = record.source(),
            "Volume created"
        );
        registry.insert(record);
        self.persist(&registry)
    }

    /// Remove a volume and its subvolume.
    ///
    /// A snapshot whose subvolume is already gone is only unregistered.
    ///
    /// # Errors
    ///
    /// - [`BtrvolError::NotFound`] if the volume is not registered
    /// - [`BtrvolError::StillMounted`] if any consumer holds it
    /// - [`BtrvolError::HasDependentSnapshots`] if a snapshot references it
    /// - [`BtrvolError::FilesystemOperationFailed`] if the delete fails; the volume
    ///   stays registered
    /// - [`BtrvolError::PersistenceFailed`] if the save fails
    pub fn remove(&self, name: &str) -> BtrvolResult<()> {
        let mut registry = self.registry.write();
        let record = registry.get(name).ok_or_else(|| not_found(name))?;

        if registry.counts().is_held(name) {
            return Err(BtrvolError::StillMounted {
                name: name.to_string(),
                count: registry.counts().get(name).unwrap_or(0),
            });
        }

        if record.is_snapshot() && !self.adapter.exists(&record.mountpoint) {
            tracing::info!(name, "Snapshot subvolume is gone, cleaning up record");
            registry.remove(name);
            return self.persist(&registry);
        }

        let snapshots = registry.dependents(name);
        if !snapshots.is_empty() {
            return Err(BtrvolError::HasDependentSnapshots {
                name: name.to_string(),
                snapshots,
            });
        }

        self.adapter
            .delete_subvolume(&record.mountpoint)
            .map_err(|e| fs_failed("delete", &record.mountpoint, e))?;

        registry.remove(name);
        tracing::info!(name, "Volume removed");
        self.persist(&registry)
    }

    /// All volumes, in unspecified order.
    pub fn list(&self) -> Vec<VolumeSummary> {
        self.registry
            .read()
            .records()
            .map(|record| VolumeSummary {
                name: record.name.clone(),
                mountpoint: record.mountpoint.clone(),
            })
            .collect()
    }

    /// Look up a volume with its creation time.
    ///
    /// # Errors
    ///
    /// - [`BtrvolError::NotFound`] if the volume is not registered
    /// - [`BtrvolError::MetadataUnavailable`] if the creation time cannot be read
    pub fn get(&self, name: &str) -> BtrvolResult<VolumeInfo> {
        let registry = self.registry.read();
        let record = registry.get(name).ok_or_else(|| not_found(name))?;

        let created_at = self.adapter.created_at(&record.mountpoint).map_err(|e| {
            tracing::error!(name, error = %e, "Failed to read volume creation time");
            BtrvolError::MetadataUnavailable {
                name: name.to_string(),
                reason: e.message,
            }
        })?;

        Ok(VolumeInfo {
            name: record.name.clone(),
            mountpoint: record.mountpoint.clone(),
            created_at,
        })
    }

    /// Mount point a volume named `name` has or would have.
    ///
    /// Does not check that the volume exists.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.paths.mountpoint(name)
    }

    /// Acquire a volume for one more consumer, returning its mount point.
    ///
    /// Only the first consumer triggers a physical mount.
    ///
    /// # Errors
    ///
    /// - [`BtrvolError::NotFound`] if the volume is not registered
    /// - [`BtrvolError::MountFailed`] if the physical mount fails; the count is unchanged
    /// - [`BtrvolError::PersistenceFailed`] if the save fails
    pub fn mount(&self, name: &str) -> BtrvolResult<PathBuf> {
        let mut registry = self.registry.write();
        let mountpoint = registry
            .get(name)
            .ok_or_else(|| not_found(name))?
            .mountpoint
            .clone();

        if registry.counts().on_acquire(name) == Transition::Mount {
            self.adapter.mount(&mountpoint).map_err(|e| {
                tracing::error!(name, error = %e, "Mount failed");
                BtrvolError::MountFailed {
                    name: name.to_string(),
                    reason: e.message,
                }
            })?;
        }

        let count = registry.counts_mut().increment(name);
        tracing::debug!(name, count, "Volume acquired");
        self.persist(&registry)?;
        Ok(mountpoint)
    }

    /// Release a volume held by one consumer.
    ///
    /// Only the last consumer triggers a physical unmount. Releasing a volume
    /// nobody holds is a no-op.
    ///
    /// # Errors
    ///
    /// - [`BtrvolError::NotFound`] if the volume is not registered
    /// - [`BtrvolError::UnmountFailed`] if the physical unmount fails; the count is unchanged
    /// - [`BtrvolError::PersistenceFailed`] if the save fails
    pub fn unmount(&self, name: &str) -> BtrvolResult<()> {
        let mut registry = self.registry.write();
        let mountpoint = registry
            .get(name)
            .ok_or_else(|| not_found(name))?
            .mountpoint
            .clone();

        if registry.counts().on_release(name) == Transition::Unmount {
            self.adapter.unmount(&mountpoint).map_err(|e| {
                tracing::error!(name, error = %e, "Unmount failed");
                BtrvolError::UnmountFailed {
                    name: name.to_string(),
                    reason: e.message,
                }
            })?;
        }

        let count = registry.counts_mut().decrement(name);
        tracing::debug!(name, count, "Volume released");
        self.persist(&registry)
    }

    /// Driver capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Local,
        }
    }

    /// Current mount count, or `None` if the volume is not registered.
    #[must_use]
    pub fn mount_count(&self, name: &str) -> Option<u64> {
        self.registry.read().counts().get(name)
    }

    /// Home directory paths.
    #[must_use]
    pub const fn paths(&self) -> &BtrvolPaths {
        &self.paths
    }

    fn persist(&self, registry: &Registry) -> BtrvolResult<()> {
        self.store.save(&registry.to_document()).inspect_err(|e| {
            tracing::error!(error = %e, "Volume state is ahead of disk");
        })
    }
}

fn not_found(name: &str) -> BtrvolError {
    BtrvolError::NotFound {
        name: name.to_string(),
    }
}

/// Log adapter diagnostics and wrap them for the caller.
fn fs_failed(operation: &'static str, path: &Path, err: AdapterError) -> BtrvolError {
    tracing::error!(
        operation,
        path = %path.display(),
        output = %err.message,
        "btrfs operation failed"
    );
    BtrvolError::FilesystemOperationFailed {
        operation,
        path: path.to_path_buf(),
        output: err.message,
    }
}
