//! # btrvol
//!
//! Copy-on-write volume driver backed by btrfs subvolumes.
//!
//! ## Features
//!
//! - **Named volumes**: each volume is a subvolume at `home/<name>`
//! - **Snapshots**: volumes can be created as snapshots of other volumes; an
//!   origin cannot be removed while its snapshots exist
//! - **Shared mounts**: mount reference counting, with a physical mount only
//!   for the first consumer and a physical unmount only for the last
//! - **Crash-safe state**: volumes and mount counts are saved together as one
//!   atomically replaced document
//!
//! ## Usage
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use btrvol::{BtrfsCli, JsonFileStore, VolumeDriver};
//! use btrvol_common::BtrvolPaths;
//!
//! # fn example() -> btrvol_common::BtrvolResult<()> {
//! let paths = BtrvolPaths::new();
//! let driver = VolumeDriver::open(paths.clone(), BtrfsCli::new(), JsonFileStore::new(paths))?;
//!
//! driver.create("data", &HashMap::new())?;
//! let mountpoint = driver.mount("data")?;
//! println!("mounted at {}", mountpoint.display());
//! driver.unmount("data")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod driver;
pub mod mount;
pub mod registry;
pub mod store;

pub use adapter::{BtrfsCli, FilesystemAdapter, MemoryAdapter};
pub use driver::{Capabilities, Scope, VolumeDriver, VolumeInfo, VolumeSummary};
pub use registry::{Registry, VolumeKind, VolumeRecord};
pub use store::{JsonFileStore, PersistenceStore, StateDocument};
