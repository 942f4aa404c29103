//! Backing store selection

use std::io;
use std::os::fd::OwnedFd;
use std::path::PathBuf;

/// Where buffer content lives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackingStore {
    /// Kernel anonymous memory (`memfd_create` on Linux)
    #[default]
    Anonymous,
    /// Unlinked files inside a mounted memory filesystem (tmpfs, ramfs)
    Directory(PathBuf),
}

impl BackingStore {
    /// Use unlinked files inside `path`
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        BackingStore::Directory(path.into())
    }

    /// Create a fresh, empty backing file
    pub(crate) fn create(&self) -> io::Result<OwnedFd> {
        match self {
            BackingStore::Anonymous => anonymous(),
            BackingStore::Directory(dir) => Ok(OwnedFd::from(tempfile::tempfile_in(dir)?)),
        }
    }
}

#[cfg(target_os = "linux")]
fn anonymous() -> io::Result<OwnedFd> {
    use rustix::fs::{memfd_create, MemfdFlags};

    Ok(memfd_create("svcstream-buffer", MemfdFlags::CLOEXEC)?)
}

#[cfg(not(target_os = "linux"))]
fn anonymous() -> io::Result<OwnedFd> {
    Ok(OwnedFd::from(tempfile::tempfile()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_anonymous() {
        assert_eq!(BackingStore::default(), BackingStore::Anonymous);
    }

    #[test]
    fn test_create_anonymous() {
        assert!(BackingStore::Anonymous.create().is_ok());
    }

    #[test]
    fn test_create_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackingStore::directory(dir.path());
        assert!(store.create().is_ok());

        // Files are unlinked on creation, so nothing is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_create_in_missing_directory() {
        let store = BackingStore::directory("/nonexistent/svcstream");
        assert!(store.create().is_err());
    }
}
