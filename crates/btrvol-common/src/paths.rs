//! Well-known filesystem locations for the plugin.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default home directory holding subvolumes and state.
pub static BTRVOL_HOME: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BTRVOL_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/docker-btrfs-plugin"))
});

/// Default plugin socket, discovered by the container engine by name.
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/btrfs.sock";

const STATE_FILE: &str = "state.json";
const LEGACY_VOLUMES_FILE: &str = "btrfsVolumesConfig.json";
const LEGACY_COUNTS_FILE: &str = "btrfsCountConfig.json";

/// Standard paths used by the volume plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtrvolPaths {
    /// Home directory; every volume lives at `home/<name>`.
    pub home: PathBuf,
}

impl BtrvolPaths {
    /// Create paths with the default home directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths rooted at a custom home directory.
    #[must_use]
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Mount point for a volume. Purely derived, the volume need not exist.
    #[must_use]
    pub fn mountpoint(&self, name: &str) -> PathBuf {
        self.home.join(name)
    }

    /// Combined state document.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.home.join(STATE_FILE)
    }

    /// Volume table written by older releases.
    #[must_use]
    pub fn legacy_volumes_file(&self) -> PathBuf {
        self.home.join(LEGACY_VOLUMES_FILE)
    }

    /// Mount-count table written by older releases.
    #[must_use]
    pub fn legacy_counts_file(&self) -> PathBuf {
        self.home.join(LEGACY_COUNTS_FILE)
    }

    /// Home directory as a path reference.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Create the home directory with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        use std::os::unix::fs::DirBuilderExt;

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.home)
    }
}

impl Default for BtrvolPaths {
    fn default() -> Self {
        Self {
            home: BTRVOL_HOME.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_home() {
        let paths = BtrvolPaths::with_home("/tmp/btrvol-test");
        assert_eq!(
            paths.mountpoint("data"),
            PathBuf::from("/tmp/btrvol-test/data")
        );
        assert_eq!(
            paths.state_file(),
            PathBuf::from("/tmp/btrvol-test/state.json")
        );
    }

    #[test]
    fn legacy_documents() {
        let paths = BtrvolPaths::with_home("/var/lib/docker-btrfs-plugin");
        assert_eq!(
            paths.legacy_volumes_file(),
            PathBuf::from("/var/lib/docker-btrfs-plugin/btrfsVolumesConfig.json")
        );
        assert_eq!(
            paths.legacy_counts_file(),
            PathBuf::from("/var/lib/docker-btrfs-plugin/btrfsCountConfig.json")
        );
    }

    #[test]
    fn create_dirs_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let paths = BtrvolPaths::with_home(temp.path().join("nested/home"));
        paths.create_dirs().unwrap();
        paths.create_dirs().unwrap();
        assert!(paths.home().is_dir());
    }
}
