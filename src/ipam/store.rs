/*!
 * Allocation Store
 * File-backed container -> IP records guarded by an advisory flock
 *
 * Layout under the data directory:
 *   <data_dir>/<network>/lock              - flock target, never rewritten
 *   <data_dir>/<network>/allocations.json  - StoreData, replaced atomically
 *
 * The lock mode is encoded in the guard type: `StoreGuard<Shared>` can only
 * read, `StoreGuard<Exclusive>` can also add and delete.
 */

use super::types::{Allocation, Exclusive, LockMode, Shared, StoreData};
use crate::core::errors::{CniError, CniResult};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "lock";
pub const DATA_FILE: &str = "allocations.json";

/// Persisted allocation set for one network
pub struct AllocationStore {
    network: String,
    dir: PathBuf,
    lock_file: File,
}

impl AllocationStore {
    /// Open (creating if needed) the store for `network` under `data_dir`
    pub fn open(data_dir: impl AsRef<Path>, network: &str) -> CniResult<Self> {
        if network.is_empty()
            || network == "."
            || network == ".."
            || network.contains(std::path::MAIN_SEPARATOR)
        {
            return Err(CniError::Config(format!(
                "invalid network name {:?}",
                network
            )));
        }

        let dir = data_dir.as_ref().join(network);
        fs::create_dir_all(&dir).map_err(|e| {
            CniError::Storage(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| CniError::Lock(format!("{}: {}", lock_path.display(), e)))?;

        debug!(network, dir = %dir.display(), "allocation store opened");
        Ok(Self {
            network: network.to_string(),
            dir,
            lock_file,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Take the exclusive lock; required for any sequence that may write
    pub fn lock(&self) -> CniResult<StoreGuard<'_, Exclusive>> {
        self.acquire(FlockArg::LockExclusive)
    }

    /// Take the shared lock for read-only sequences
    pub fn rlock(&self) -> CniResult<StoreGuard<'_, Shared>> {
        self.acquire(FlockArg::LockShared)
    }

    fn acquire<M: LockMode>(&self, arg: FlockArg) -> CniResult<StoreGuard<'_, M>> {
        let file = self
            .lock_file
            .try_clone()
            .map_err(|e| CniError::Lock(e.to_string()))?;

        let flock = Flock::lock(file, arg)
            .map_err(|(_, errno)| CniError::Lock(format!("{} lock: {}", M::NAME, errno)))?;

        debug!(network = %self.network, mode = M::NAME, "store lock acquired");
        Ok(StoreGuard {
            store: self,
            flock: Some(flock),
            data: StoreData::default(),
            _mode: PhantomData,
        })
    }

    /// Release the lock file handle
    pub fn close(self) {
        debug!(network = %self.network, "allocation store closed");
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }
}

/// Held store lock plus the in-memory view loaded under it
///
/// Dropping the guard releases the lock.
pub struct StoreGuard<'a, M: LockMode> {
    store: &'a AllocationStore,
    flock: Option<Flock<File>>,
    data: StoreData,
    _mode: PhantomData<M>,
}

impl<M: LockMode> StoreGuard<'_, M> {
    /// Re-read persisted state; state may have changed since the last invocation
    pub fn load_data(&mut self) -> CniResult<()> {
        let path = self.store.data_path();
        self.data = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StoreData::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CniError::Storage(format!("corrupt store {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(CniError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(())
    }

    pub fn get_ip_by_id(&self, id: &str) -> Option<Ipv4Addr> {
        self.data
            .allocations
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.ip)
    }

    pub fn contain(&self, ip: Ipv4Addr) -> bool {
        self.data.allocations.iter().any(|a| a.ip == ip)
    }

    pub fn last(&self) -> Option<Ipv4Addr> {
        self.data.last
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.data.allocations
    }

    /// Release the lock explicitly
    pub fn unlock(mut self) -> CniResult<()> {
        if let Some(flock) = self.flock.take() {
            flock
                .unlock()
                .map_err(|(_, errno)| CniError::Lock(format!("unlock: {}", errno)))?;
        }
        Ok(())
    }
}

impl StoreGuard<'_, Exclusive> {
    /// Record `ip` for `id` and persist
    pub fn add(&mut self, ip: Ipv4Addr, id: &str, if_name: &str) -> CniResult<()> {
        if let Some(existing) = self.data.allocations.iter().find(|a| a.id == id || a.ip == ip) {
            return Err(CniError::Storage(format!(
                "{} already holds {}",
                existing.id, existing.ip
            )));
        }

        let previous_last = self.data.last;
        self.data.allocations.push(Allocation {
            id: id.to_string(),
            if_name: if_name.to_string(),
            ip,
        });
        self.data.last = Some(ip);

        if let Err(e) = self.persist() {
            self.data.allocations.pop();
            self.data.last = previous_last;
            return Err(e);
        }
        Ok(())
    }

    /// Remove the record for `id`; an unknown id is not an error
    pub fn del(&mut self, id: &str) -> CniResult<()> {
        let before = self.data.allocations.len();
        self.data.allocations.retain(|a| a.id != id);
        if self.data.allocations.len() == before {
            debug!(network = %self.store.network, id, "no allocation to delete");
            return Ok(());
        }
        self.persist()
    }

    fn persist(&self) -> CniResult<()> {
        let path = self.store.data_path();
        let json = serde_json::to_vec_pretty(&self.data)
            .map_err(|e| CniError::Storage(format!("failed to encode store: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(&self.store.dir)
            .map_err(|e| CniError::Storage(format!("failed to create temp file: {}", e)))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| CniError::Storage(format!("failed to write store: {}", e)))?;
        tmp.persist(&path).map_err(|e| {
            CniError::Storage(format!("failed to replace {}: {}", path.display(), e.error))
        })?;
        Ok(())
    }
}

impl<M: LockMode> Drop for StoreGuard<'_, M> {
    fn drop(&mut self) {
        if let Some(flock) = self.flock.take() {
            if let Err((_, errno)) = flock.unlock() {
                warn!(network = %self.store.network, %errno, "store unlock on drop failed");
            }
        }
    }
}
