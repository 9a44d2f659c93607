//! Per-Pool Locks and Disk Claims
//!
//! At most one structural mutation per pool name is in flight. Locks are
//! keyed by name, so a create racing another create of the same name
//! serializes too.
//!
//! Operations on different pools run concurrently, so disks are claimed
//! separately: a disk named by an in-flight create or add cannot be claimed
//! by another pool until that operation has stored its record or failed.

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Guard held across validate -> effect -> record update
pub type PoolGuard = OwnedMutexGuard<()>;

/// Exclusive locks keyed by pool name
#[derive(Debug, Default)]
pub struct PoolLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PoolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    ///
    /// Entries are never removed: a waiter still holding the old mutex
    /// after a delete must contend with a later create of the same name.
    pub async fn acquire(&self, name: &str) -> PoolGuard {
        let lock = {
            let entry = self.locks.entry(name.to_string()).or_default();
            Arc::clone(&*entry)
        };
        trace!(pool = %name, "Waiting for pool lock");
        lock.lock_owned().await
    }

    /// Whether someone currently holds the lock for `name`
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of names that ever had a lock taken
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

// =============================================================================
// Disk Claims
// =============================================================================

/// Disk name -> pool name for disks about to become pool members
#[derive(Debug, Default)]
pub struct DiskClaims {
    claims: Arc<DashMap<String, String>>,
}

/// Releases the claimed disks when dropped
#[derive(Debug)]
pub struct ClaimGuard {
    claims: Arc<DashMap<String, String>>,
    disks: Vec<String>,
}

impl DiskClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `disks` for `pool`, all or nothing.
    ///
    /// Fails with `DiskInUse` naming the other pool if any disk is already
    /// claimed by it. Disks claimed before the failure are released.
    pub fn claim(&self, pool: &str, disks: &[String]) -> Result<ClaimGuard> {
        let mut guard = ClaimGuard {
            claims: Arc::clone(&self.claims),
            disks: Vec::with_capacity(disks.len()),
        };
        for disk in disks {
            let holder = match self.claims.entry(disk.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    entry.insert(pool.to_string());
                    guard.disks.push(disk.clone());
                    continue;
                }
            };
            if holder != pool {
                trace!(disk = %disk, holder = %holder, "Disk already claimed");
                return Err(Error::DiskInUse {
                    disk: disk.clone(),
                    pool: holder,
                });
            }
        }
        Ok(guard)
    }

    /// Pool currently claiming `disk`
    pub fn holder(&self, disk: &str) -> Option<String> {
        self.claims.get(disk).map(|holder| holder.clone())
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        for disk in &self.disks {
            self.claims.remove(disk);
        }
    }
}
