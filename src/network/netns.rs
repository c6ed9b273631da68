/*!
 * Network Namespace Handles
 * Open namespace references and scoped namespace switching
 *
 * `setns(2)` only affects the calling thread. `NetNs::run` swaps the thread
 * into the namespace, runs a closure, and restores the original namespace
 * through a guard, so every exit path (including unwinding) switches back.
 */

use crate::core::errors::{CniError, CniResult};
use nix::sched::{setns, CloneFlags};
use nix::sys::statfs::{fstatfs, NSFS_MAGIC, PROC_SUPER_MAGIC};
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Namespace of the calling thread
pub const CURRENT_THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// An open reference to a network namespace
///
/// The namespace stays alive as long as the handle is open.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    path: PathBuf,
}

impl NetNs {
    /// Open the namespace at `path` (e.g. `/var/run/netns/x` or `/proc/<pid>/ns/net`)
    pub fn open(path: impl AsRef<Path>) -> CniResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            CniError::Namespace(format!("failed to open netns {}: {}", path.display(), e))
        })?;

        let fs_type = fstatfs(&file)
            .map_err(|e| {
                CniError::Namespace(format!("failed to statfs {}: {}", path.display(), e))
            })?
            .filesystem_type();
        if fs_type != NSFS_MAGIC && fs_type != PROC_SUPER_MAGIC {
            return Err(CniError::Namespace(format!(
                "unknown FS magic on {}: {:x}",
                path.display(),
                fs_type.0
            )));
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// The calling thread's current network namespace
    pub fn current() -> CniResult<Self> {
        Self::open(CURRENT_THREAD_NETNS)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Switch the calling thread into this namespace until the guard drops
    pub fn enter(&self) -> CniResult<NetNsGuard> {
        let original = Self::current()?;
        setns(&self.file, CloneFlags::CLONE_NEWNET).map_err(|e| {
            CniError::Namespace(format!("failed to enter netns {}: {}", self.path.display(), e))
        })?;
        debug!(netns = %self.path.display(), "entered network namespace");
        Ok(NetNsGuard {
            original: Some(original),
        })
    }

    /// Run `f` with this namespace swapped in, restoring the caller's namespace afterwards
    pub fn run<T, F>(&self, f: F) -> CniResult<T>
    where
        F: FnOnce() -> CniResult<T>,
    {
        let guard = self.enter()?;
        let result = f();
        guard.restore()?;
        result
    }

    /// Close the handle
    pub fn close(self) {
        debug!(netns = %self.path.display(), "closed network namespace handle");
    }
}

impl AsFd for NetNs {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for NetNs {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Puts the thread back into its original namespace on drop
#[must_use = "dropping the guard immediately leaves the namespace"]
pub struct NetNsGuard {
    original: Option<NetNs>,
}

impl NetNsGuard {
    /// Leave the namespace, reporting a failed switch back
    pub fn restore(mut self) -> CniResult<()> {
        match self.original.take() {
            Some(original) => switch_to(&original),
            None => Ok(()),
        }
    }
}

impl Drop for NetNsGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            if let Err(e) = switch_to(&original) {
                error!(error = %e, "thread left in foreign network namespace");
            }
        }
    }
}

fn switch_to(original: &NetNs) -> CniResult<()> {
    setns(&original.file, CloneFlags::CLONE_NEWNET).map_err(|e| {
        CniError::Namespace(format!(
            "failed to restore netns {}: {}",
            original.path.display(),
            e
        ))
    })?;
    debug!(netns = %original.path.display(), "restored network namespace");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_current() {
        let ns = NetNs::current().unwrap();
        assert_eq!(ns.path(), Path::new(CURRENT_THREAD_NETNS));
        assert!(ns.as_raw_fd() >= 0);
    }

    #[test]
    fn test_open_missing_path() {
        let err = NetNs::open("/nonexistent/netns/handle").unwrap_err();
        assert!(matches!(err, CniError::Namespace(_)));
    }

    #[test]
    fn test_open_regular_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = NetNs::open(file.path()).unwrap_err();
        assert!(matches!(err, CniError::Namespace(msg) if msg.contains("FS magic")));
    }
}
