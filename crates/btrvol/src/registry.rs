//! In-memory volume registry.
//!
//! The registry owns both the volume table and the mount-count table and
//! keeps them in lockstep: a count exists exactly while its record does.
//! It performs no I/O; [`crate::VolumeDriver`] wraps it in a lock and
//! sequences adapter calls and persistence around it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::mount::MountCounts;
use crate::store::StateDocument;

/// Kind of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeKind {
    /// A freshly created, empty subvolume.
    Plain,
    /// A copy-on-write snapshot of another volume.
    Snapshot {
        /// Name of the origin volume at snapshot time.
        source: String,
    },
}

/// A registered volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "PersistedVolume", from = "PersistedVolume")]
pub struct VolumeRecord {
    /// Unique volume name.
    pub name: String,
    /// Subvolume location, `home/<name>`.
    pub mountpoint: PathBuf,
    /// Plain volume or snapshot.
    pub kind: VolumeKind,
}

impl VolumeRecord {
    /// A plain volume.
    pub fn plain(name: impl Into<String>, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mountpoint: mountpoint.into(),
            kind: VolumeKind::Plain,
        }
    }

    /// A snapshot of `source`.
    pub fn snapshot(
        name: impl Into<String>,
        mountpoint: impl Into<PathBuf>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mountpoint: mountpoint.into(),
            kind: VolumeKind::Snapshot {
                source: source.into(),
            },
        }
    }

    /// Origin volume name, for snapshots.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        match &self.kind {
            VolumeKind::Plain => None,
            VolumeKind::Snapshot { source } => Some(source),
        }
    }

    /// Whether this record is a snapshot.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self.kind, VolumeKind::Snapshot { .. })
    }
}

/// On-disk shape of a record: `{name, mountpoint, type, source}`, with
/// `type` empty for plain volumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedVolume {
    name: String,
    mountpoint: PathBuf,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    source: String,
}

const SNAPSHOT_TYPE: &str = "Snapshot";

impl From<VolumeRecord> for PersistedVolume {
    fn from(record: VolumeRecord) -> Self {
        let (kind, source) = match record.kind {
            VolumeKind::Plain => (String::new(), String::new()),
            VolumeKind::Snapshot { source } => (SNAPSHOT_TYPE.to_string(), source),
        };
        Self {
            name: record.name,
            mountpoint: record.mountpoint,
            kind,
            source,
        }
    }
}

impl From<PersistedVolume> for VolumeRecord {
    fn from(persisted: PersistedVolume) -> Self {
        let kind = if persisted.kind == SNAPSHOT_TYPE {
            VolumeKind::Snapshot {
                source: persisted.source,
            }
        } else {
            VolumeKind::Plain
        };
        Self {
            name: persisted.name,
            mountpoint: persisted.mountpoint,
            kind,
        }
    }
}

/// Volume table plus mount counts.
#[derive(Debug, Default)]
pub struct Registry {
    volumes: HashMap<String, VolumeRecord>,
    counts: MountCounts,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from a persisted document.
    ///
    /// Records filed under a key other than their own name are skipped, as
    /// are records whose mount point an earlier record already owns. Counts
    /// without a record are dropped and records without a count start at
    /// zero.
    #[must_use]
    pub fn from_document(document: StateDocument) -> Self {
        let mut registry = Self::new();

        for (key, record) in document.volumes {
            if key != record.name {
                tracing::warn!(
                    key = %key,
                    name = %record.name,
                    "Skipping volume filed under wrong key"
                );
                continue;
            }
            if let Some(owner) = registry.mountpoint_owner(&record.mountpoint) {
                tracing::warn!(
                    name = %key,
                    owner,
                    path = %record.mountpoint.display(),
                    "Skipping volume whose mount point is already owned"
                );
                continue;
            }
            let count = document.counts.get(&key).copied();
            if count.is_none() {
                tracing::warn!(name = %key, "Volume has no mount count, starting at zero");
            }
            registry.insert(record);
            registry.counts.set(&key, count.unwrap_or(0));
        }

        for name in document.counts.keys() {
            if !registry.contains(name) {
                tracing::warn!(name = %name, "Dropping mount count for unknown volume");
            }
        }

        registry
    }

    /// Snapshot the registry as a persistable document.
    #[must_use]
    pub fn to_document(&self) -> StateDocument {
        StateDocument {
            volumes: self
                .volumes
                .iter()
                .map(|(name, record)| (name.clone(), record.clone()))
                .collect(),
            counts: self.counts.to_map(),
        }
    }

    /// Whether a volume is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    /// Look up a volume.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VolumeRecord> {
        self.volumes.get(name)
    }

    /// Register a volume with a zero mount count.
    ///
    /// An existing record under the same name is replaced and its count reset.
    pub fn insert(&mut self, record: VolumeRecord) {
        self.counts.set(&record.name, 0);
        self.volumes.insert(record.name.clone(), record);
    }

    /// Unregister a volume and its mount count.
    pub fn remove(&mut self, name: &str) -> Option<VolumeRecord> {
        self.counts.forget(name);
        self.volumes.remove(name)
    }

    /// Iterate over all records in unspecified order.
    pub fn records(&self) -> impl Iterator<Item = &VolumeRecord> {
        self.volumes.values()
    }

    /// Number of registered volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether no volumes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Mount counts.
    #[must_use]
    pub const fn counts(&self) -> &MountCounts {
        &self.counts
    }

    /// Mutable mount counts.
    pub const fn counts_mut(&mut self) -> &mut MountCounts {
        &mut self.counts
    }

    /// Snapshots whose origin is `name`, sorted by name.
    ///
    /// Computed on demand; only direct snapshots are considered.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut snapshots: Vec<String> = self
            .volumes
            .values()
            .filter(|v| v.name != name && v.source() == Some(name))
            .map(|v| v.name.clone())
            .collect();
        snapshots.sort();
        snapshots
    }

    /// Name of the volume already using `mountpoint`, if any.
    #[must_use]
    pub fn mountpoint_owner(&self, mountpoint: &Path) -> Option<&str> {
        self.volumes
            .values()
            .find(|v| v.mountpoint == mountpoint)
            .map(|v| v.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(records: Vec<VolumeRecord>) -> Registry {
        let mut registry = Registry::new();
        for record in records {
            registry.insert(record);
        }
        registry
    }

    #[test]
    fn insert_tracks_count() {
        let registry = registry_with(vec![VolumeRecord::plain("a", "/h/a")]);
        assert!(registry.contains("a"));
        assert_eq!(registry.counts().get("a"), Some(0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_resets_count_of_replaced_record() {
        let mut registry = registry_with(vec![VolumeRecord::plain("a", "/h/a")]);
        registry.counts_mut().increment("a");

        registry.insert(VolumeRecord::snapshot("a", "/h/a", "base"));
        assert_eq!(registry.counts().get("a"), Some(0));
        assert!(registry.get("a").unwrap().is_snapshot());
    }

    #[test]
    fn remove_forgets_count() {
        let mut registry = registry_with(vec![VolumeRecord::plain("a", "/h/a")]);
        registry.counts_mut().increment("a");

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.name, "a");
        assert!(registry.is_empty());
        assert_eq!(registry.counts().get("a"), None);
    }

    #[test]
    fn dependents_scan() {
        let registry = registry_with(vec![
            VolumeRecord::plain("base", "/h/base"),
            VolumeRecord::snapshot("snap2", "/h/snap2", "base"),
            VolumeRecord::snapshot("snap1", "/h/snap1", "base"),
            VolumeRecord::snapshot("other", "/h/other", "elsewhere"),
        ]);

        assert_eq!(registry.dependents("base"), vec!["snap1", "snap2"]);
        assert!(registry.dependents("snap1").is_empty());
        assert_eq!(registry.dependents("elsewhere"), vec!["other"]);
    }

    #[test]
    fn from_document_reconciles_counts() {
        let mut document = StateDocument::default();
        document
            .volumes
            .insert("a".to_string(), VolumeRecord::plain("a", "/h/a"));
        document
            .volumes
            .insert("b".to_string(), VolumeRecord::plain("b", "/h/b"));
        document
            .volumes
            .insert("wrong".to_string(), VolumeRecord::plain("c", "/h/c"));
        document.counts.insert("a".to_string(), 2);
        document.counts.insert("ghost".to_string(), 5);

        let registry = Registry::from_document(document);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.counts().get("a"), Some(2));
        assert_eq!(registry.counts().get("b"), Some(0));
        assert_eq!(registry.counts().get("ghost"), None);
        assert!(!registry.contains("wrong"));
        assert!(!registry.contains("c"));
    }

    #[test]
    fn from_document_skips_shared_mountpoints() {
        let mut document = StateDocument::default();
        document
            .volumes
            .insert("a".to_string(), VolumeRecord::plain("a", "/h/shared"));
        document
            .volumes
            .insert("b".to_string(), VolumeRecord::plain("b", "/h/shared"));
        document.counts.insert("a".to_string(), 1);
        document.counts.insert("b".to_string(), 3);

        let registry = Registry::from_document(document);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("a"));
        assert!(!registry.contains("b"));
        assert_eq!(registry.counts().get("b"), None);
        assert_eq!(registry.mountpoint_owner(Path::new("/h/shared")), Some("a"));
        assert_eq!(registry.mountpoint_owner(Path::new("/h/b")), None);
    }

    #[test]
    fn document_round_trip() {
        let mut registry = registry_with(vec![
            VolumeRecord::plain("a", "/h/a"),
            VolumeRecord::snapshot("b", "/h/b", "a"),
        ]);
        registry.counts_mut().increment("b");

        let restored = Registry::from_document(registry.to_document());
        assert_eq!(restored.get("b"), registry.get("b"));
        assert_eq!(restored.counts().get("b"), Some(1));
        assert_eq!(restored.to_document(), registry.to_document());
    }

    #[test]
    fn record_wire_shape() {
        let snapshot = VolumeRecord::snapshot("b", "/h/b", "a");
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "b",
                "mountpoint": "/h/b",
                "type": "Snapshot",
                "source": "a",
            })
        );

        let plain: VolumeRecord =
            serde_json::from_str(r#"{"name":"a","mountpoint":"/h/a","type":"","source":""}"#)
                .unwrap();
        assert_eq!(plain, VolumeRecord::plain("a", "/h/a"));

        let sparse: VolumeRecord =
            serde_json::from_str(r#"{"name":"a","mountpoint":"/h/a"}"#).unwrap();
        assert_eq!(sparse.source(), None);
    }
}
