//! Durable volume state.
//!
//! Both tables are written together as one JSON document,
//! `{"volumes": {...}, "counts": {...}}`, through a temp file in the same
//! directory that is synced and then renamed over the previous document. A
//! crash leaves either the old or the new document, never a mix.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use btrvol_common::{BtrvolError, BtrvolPaths, BtrvolResult};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::registry::VolumeRecord;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Volume records keyed by name.
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeRecord>,
    /// Mount counts keyed by volume name.
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

/// Loads and saves [`StateDocument`]s.
pub trait PersistenceStore: Send + Sync {
    /// Load the last saved document, or `None` if nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns [`BtrvolError::PersistenceFailed`] if a document exists but
    /// cannot be read or parsed.
    fn load(&self) -> BtrvolResult<Option<StateDocument>>;

    /// Replace the saved document.
    ///
    /// # Errors
    ///
    /// Returns [`BtrvolError::PersistenceFailed`] if the write fails; the
    /// previous document is then left intact.
    fn save(&self, document: &StateDocument) -> BtrvolResult<()>;
}

/// JSON file store under the plugin home directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    paths: BtrvolPaths,
}

impl JsonFileStore {
    /// Create a store writing to `paths.state_file()`.
    #[must_use]
    pub const fn new(paths: BtrvolPaths) -> Self {
        Self { paths }
    }

    fn failed(path: &Path, reason: impl ToString) -> BtrvolError {
        BtrvolError::PersistenceFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Read a JSON file, mapping absence to `None`.
    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> BtrvolResult<Option<T>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::failed(path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| Self::failed(path, e))
    }

    /// Read the two documents written by older releases.
    ///
    /// They were written one after the other, so the count table may be
    /// missing or stale; [`crate::Registry::from_document`] reconciles it.
    fn load_legacy(&self) -> BtrvolResult<Option<StateDocument>> {
        let volumes_path = self.paths.legacy_volumes_file();
        let Some(volumes) = Self::read_json::<BTreeMap<String, VolumeRecord>>(&volumes_path)?
        else {
            return Ok(None);
        };

        let counts_path = self.paths.legacy_counts_file();
        let counts = Self::read_json::<BTreeMap<String, i64>>(&counts_path)?
            .unwrap_or_default()
            .into_iter()
            .map(|(name, count)| (name, u64::try_from(count).unwrap_or(0)))
            .collect();

        tracing::info!(
            path = %volumes_path.display(),
            volumes = volumes.len(),
            "Migrating legacy volume state"
        );

        Ok(Some(StateDocument { volumes, counts }))
    }
}

impl PersistenceStore for JsonFileStore {
    fn load(&self) -> BtrvolResult<Option<StateDocument>> {
        let path = self.paths.state_file();
        match Self::read_json::<StateDocument>(&path)? {
            Some(document) => {
                tracing::debug!(
                    path = %path.display(),
                    volumes = document.volumes.len(),
                    "Loaded volume state"
                );
                Ok(Some(document))
            }
            None => self.load_legacy(),
        }
    }

    fn save(&self, document: &StateDocument) -> BtrvolResult<()> {
        let path = self.paths.state_file();
        let data = serde_json::to_vec_pretty(document).map_err(|e| Self::failed(&path, e))?;

        let mut temp =
            NamedTempFile::new_in(self.paths.home()).map_err(|e| Self::failed(&path, e))?;
        temp.write_all(&data).map_err(|e| Self::failed(&path, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Self::failed(&path, e))?;
        temp.persist(&path).map_err(|e| Self::failed(&path, e.error))?;

        tracing::debug!(
            path = %path.display(),
            volumes = document.volumes.len(),
            "Saved volume state"
        );
        Ok(())
    }
}
