//! `btrfs` command-line adapter.

use std::ffi::OsStr;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};

use super::{AdapterError, AdapterResult, FilesystemAdapter};

/// Default name of the btrfs tool, resolved through `PATH`.
pub const DEFAULT_BTRFS_BIN: &str = "btrfs";

/// Adapter that shells out to `btrfs subvolume ...`.
///
/// Mounting bind-mounts a subvolume onto itself so the first consumer gets a
/// dedicated mount point; with bind mounts disabled, mount and unmount only
/// check that the subvolume is present.
#[derive(Debug, Clone)]
pub struct BtrfsCli {
    binary: PathBuf,
    bind_mount: bool,
}

impl BtrfsCli {
    /// Create an adapter using `btrfs` from `PATH` with bind mounts enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `btrfs` binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Enable or disable self bind mounts.
    #[must_use]
    pub const fn with_bind_mount(mut self, bind_mount: bool) -> Self {
        self.bind_mount = bind_mount;
        self
    }

    /// Run `btrfs` with the given arguments, returning combined output on failure.
    fn run<I, S>(&self, args: I) -> AdapterResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);

        tracing::debug!(command = ?cmd, "Running btrfs");

        let output = cmd.output().map_err(|e| {
            AdapterError::new(format!("failed to run {}: {e}", self.binary.display()))
        })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(AdapterError::new(format!(
            "{}: {}",
            output.status,
            combined.trim()
        )))
    }

    fn ensure_parent(path: &Path) -> AdapterResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)?;
        }
        Ok(())
    }
}

impl Default for BtrfsCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BTRFS_BIN),
            bind_mount: true,
        }
    }
}

impl FilesystemAdapter for BtrfsCli {
    fn create_subvolume(&self, path: &Path) -> AdapterResult<()> {
        Self::ensure_parent(path)?;
        self.run([OsStr::new("subvolume"), OsStr::new("create"), path.as_os_str()])
    }

    fn snapshot(&self, source: &Path, dest: &Path) -> AdapterResult<()> {
        Self::ensure_parent(dest)?;
        self.run([
            OsStr::new("subvolume"),
            OsStr::new("snapshot"),
            source.as_os_str(),
            dest.as_os_str(),
        ])
    }

    fn delete_subvolume(&self, path: &Path) -> AdapterResult<()> {
        self.run([OsStr::new("subvolume"), OsStr::new("delete"), path.as_os_str()])
    }

    fn mount(&self, path: &Path) -> AdapterResult<()> {
        if !self.exists(path) {
            return Err(AdapterError::new(format!(
                "{} does not exist",
                path.display()
            )));
        }
        if self.bind_mount {
            rustix::mount::mount_bind(path, path).map_err(std::io::Error::from)?;
            tracing::debug!(path = %path.display(), "Bind mounted subvolume");
        }
        Ok(())
    }

    fn unmount(&self, path: &Path) -> AdapterResult<()> {
        if !self.bind_mount {
            return Ok(());
        }
        match rustix::mount::unmount(path, rustix::mount::UnmountFlags::DETACH) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Detached subvolume mount");
            }
            // Bind mounts do not survive a reboot, but mount counts do.
            Err(errno) if is_not_mounted(errno) => {
                tracing::warn!(path = %path.display(), "Subvolume was not mounted");
            }
            Err(errno) => return Err(std::io::Error::from(errno).into()),
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn created_at(&self, path: &Path) -> AdapterResult<DateTime<Utc>> {
        let metadata = std::fs::metadata(path)?;
        let time = metadata.created().or_else(|_| metadata.modified())?;
        Ok(DateTime::<Utc>::from(time))
    }
}

/// Whether an unmount failure means nothing is mounted at the path.
fn is_not_mounted(errno: rustix::io::Errno) -> bool {
    errno == rustix::io::Errno::INVAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builder_pattern() {
        let adapter = BtrfsCli::new()
            .with_binary("/usr/local/bin/btrfs")
            .with_bind_mount(false);
        assert_eq!(adapter.binary, PathBuf::from("/usr/local/bin/btrfs"));
        assert!(!adapter.bind_mount);
    }

    #[test]
    fn failing_tool_reports_output() {
        // `false` exits non-zero regardless of arguments.
        let adapter = BtrfsCli::new().with_binary("false");
        let temp = tempdir().unwrap();
        let err = adapter
            .create_subvolume(&temp.path().join("vol"))
            .unwrap_err();
        assert!(err.message.contains("exit status"), "{}", err.message);
    }

    #[test]
    fn missing_tool_is_an_error() {
        let adapter = BtrfsCli::new().with_binary("/nonexistent/btrfs");
        let err = adapter.delete_subvolume(Path::new("/tmp/x")).unwrap_err();
        assert!(err.message.contains("failed to run"));
    }

    #[test]
    fn metadata_lookups() {
        let temp = tempdir().unwrap();
        let adapter = BtrfsCli::new().with_bind_mount(false);

        assert!(adapter.exists(temp.path()));
        assert!(!adapter.exists(&temp.path().join("missing")));
        assert!(adapter.created_at(temp.path()).is_ok());
        assert!(adapter.created_at(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn mount_without_bind_checks_presence() {
        let temp = tempdir().unwrap();
        let adapter = BtrfsCli::new().with_bind_mount(false);

        assert!(adapter.mount(temp.path()).is_ok());
        assert!(adapter.unmount(temp.path()).is_ok());
        assert!(adapter.mount(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn not_mounted_errno() {
        assert!(is_not_mounted(rustix::io::Errno::INVAL));
        assert!(!is_not_mounted(rustix::io::Errno::BUSY));
        assert!(!is_not_mounted(rustix::io::Errno::PERM));
    }

    #[test]
    fn unmount_of_unmounted_path_succeeds() {
        let temp = tempdir().unwrap();
        let adapter = BtrfsCli::new();

        match adapter.unmount(temp.path()) {
            Ok(()) => {}
            // Without CAP_SYS_ADMIN the kernel refuses before looking at the path.
            Err(err) if err.message.contains("Operation not permitted") => {}
            Err(err) => panic!("unexpected unmount failure: {err}"),
        }
    }
}
