//! In-Memory System
//!
//! A `SystemCommands` implementation that keeps mounts and balances in
//! process memory. Used for dry runs and to exercise the manager without
//! touching real devices. Every call is recorded in order, and failures
//! can be injected per operation.

use crate::domain::ports::{BalanceState, MountSpec, SystemCommands};
use crate::error::{Error, Result};
use crate::pool::{usable_capacity, Compression, MountOptions, Pool, PoolDisk, PoolUsage, RaidLevel};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Size assumed for disks without a configured size (10 GiB)
pub const DEFAULT_DISK_SIZE: u64 = 10 * 1024 * 1024 * 1024;

// =============================================================================
// Recorded Calls
// =============================================================================

/// One call made through the port
#[derive(Debug, Clone, PartialEq)]
pub enum SystemCall {
    ResolveDisk {
        device: String,
    },
    MountPool {
        name: String,
        raid_level: RaidLevel,
        disks: Vec<String>,
        options: String,
    },
    UnmountPool {
        mount_point: PathBuf,
    },
    ResizePool {
        name: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
    RemountPool {
        name: String,
        options: String,
    },
    PoolUsage {
        name: String,
    },
    PoolUuid {
        name: String,
    },
    BalanceStart {
        name: String,
        convert_to: Option<RaidLevel>,
    },
    BalanceStatus {
        name: String,
    },
}

// =============================================================================
// In-Memory System
// =============================================================================

#[derive(Debug, Default)]
struct SystemState {
    calls: Vec<SystemCall>,
    failures: HashMap<String, String>,
    /// Mount points keyed by pool name
    mounted: HashMap<String, PathBuf>,
    used: HashMap<String, u64>,
    balances: HashMap<String, BalanceState>,
    disk_sizes: HashMap<String, u64>,
    next_job: u64,
}

/// Host system simulated in memory
#[derive(Debug)]
pub struct InMemorySystem {
    mount_root: PathBuf,
    state: Mutex<SystemState>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemorySystem {
    /// Create a system that mounts pools under `mount_root`
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            state: Mutex::new(SystemState::default()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Set disk sizes used for capacity reporting
    pub fn with_disk_sizes<I, S>(self, sizes: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            for (name, size) in sizes {
                state.disk_sizes.insert(name.into(), size);
            }
        }
        self
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<SystemCall> {
        self.state.lock().calls.clone()
    }

    /// Make the next call to `operation` fail with `message`
    pub fn fail_next(&self, operation: &str, message: &str) {
        self.state
            .lock()
            .failures
            .insert(operation.to_string(), message.to_string());
    }

    /// Pretend a pool was unmounted behind the manager's back
    pub fn forget_mount(&self, name: &str) {
        self.state.lock().mounted.remove(name);
    }

    pub fn set_used(&self, name: &str, bytes: u64) {
        self.state.lock().used.insert(name.to_string(), bytes);
    }

    pub fn set_balance_state(&self, name: &str, balance: BalanceState) {
        self.state.lock().balances.insert(name.to_string(), balance);
    }

    /// Delay every call, to widen race windows in tests
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Highest number of concurrent calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self, name: &str) -> bool {
        self.state.lock().mounted.contains_key(name)
    }

    /// Record a call, honour the delay and any injected failure
    async fn enter(&self, operation: &str, call: SystemCall) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.failures.remove(operation)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(message) => {
                debug!(operation, "Injected failure: {}", message);
                Err(Error::external(operation, message))
            }
            None => Ok(()),
        }
    }

    fn disk_size(state: &SystemState, disk: &PoolDisk) -> u64 {
        state
            .disk_sizes
            .get(&disk.name)
            .copied()
            .unwrap_or(DEFAULT_DISK_SIZE)
    }
}

fn disk_names(disks: &[PoolDisk]) -> Vec<String> {
    disks.iter().map(|d| d.name.clone()).collect()
}

#[async_trait]
impl SystemCommands for InMemorySystem {
    async fn resolve_disk_identifier(&self, device: &str) -> Result<String> {
        self.enter(
            "resolve_disk_identifier",
            SystemCall::ResolveDisk {
                device: device.to_string(),
            },
        )
        .await?;
        Ok(format!("mem-{}", device))
    }

    async fn mount_pool(&self, spec: &MountSpec) -> Result<PathBuf> {
        self.enter(
            "mount_pool",
            SystemCall::MountPool {
                name: spec.name.clone(),
                raid_level: spec.raid_level,
                disks: disk_names(&spec.disks),
                options: spec.mount_options.effective(spec.compression),
            },
        )
        .await?;

        let mut state = self.state.lock();
        if state.mounted.contains_key(&spec.name) {
            return Err(Error::external(
                "mount_pool",
                format!("mount: {} is already mounted", spec.name),
            ));
        }
        let mount_point = self.mount_root.join(&spec.name);
        state.mounted.insert(spec.name.clone(), mount_point.clone());
        state
            .balances
            .insert(spec.name.clone(), BalanceState::Finished);
        Ok(mount_point)
    }

    async fn unmount_pool(&self, mount_point: &Path) -> Result<()> {
        self.enter(
            "unmount_pool",
            SystemCall::UnmountPool {
                mount_point: mount_point.to_path_buf(),
            },
        )
        .await?;

        // Already unmounted is success
        self.state.lock().mounted.retain(|_, mp| mp != mount_point);
        Ok(())
    }

    async fn resize_pool(&self, pool: &Pool, added: &[PoolDisk], removed: &[PoolDisk]) -> Result<()> {
        self.enter(
            "resize_pool",
            SystemCall::ResizePool {
                name: pool.name.clone(),
                added: disk_names(added),
                removed: disk_names(removed),
            },
        )
        .await
    }

    async fn remount_pool(
        &self,
        pool: &Pool,
        compression: Compression,
        mount_options: &MountOptions,
    ) -> Result<()> {
        self.enter(
            "remount_pool",
            SystemCall::RemountPool {
                name: pool.name.clone(),
                options: mount_options.effective(compression),
            },
        )
        .await
    }

    async fn pool_usage(&self, pool: &Pool) -> Result<PoolUsage> {
        self.enter(
            "pool_usage",
            SystemCall::PoolUsage {
                name: pool.name.clone(),
            },
        )
        .await?;

        let state = self.state.lock();
        let sizes: Vec<u64> = pool
            .disks
            .iter()
            .map(|d| Self::disk_size(&state, d))
            .collect();
        let total = usable_capacity(pool.raid_level, &sizes);
        let used = state.used.get(&pool.name).copied().unwrap_or(0).min(total);
        Ok(PoolUsage {
            total,
            used,
            free: total - used,
        })
    }

    async fn pool_uuid(&self, pool: &Pool) -> Result<String> {
        self.enter(
            "pool_uuid",
            SystemCall::PoolUuid {
                name: pool.name.clone(),
            },
        )
        .await?;
        Ok(format!("00000000-0000-0000-0000-{:012x}", fnv1a(&pool.name)))
    }

    async fn balance_start(&self, pool: &Pool, convert_to: Option<RaidLevel>) -> Result<u64> {
        self.enter(
            "balance_start",
            SystemCall::BalanceStart {
                name: pool.name.clone(),
                convert_to,
            },
        )
        .await?;

        let mut state = self.state.lock();
        state.next_job += 1;
        state.balances.insert(
            pool.name.clone(),
            BalanceState::Running {
                percent_done: Some(0),
            },
        );
        Ok(state.next_job)
    }

    async fn balance_status(&self, pool: &Pool) -> Result<BalanceState> {
        self.enter(
            "balance_status",
            SystemCall::BalanceStatus {
                name: pool.name.clone(),
            },
        )
        .await?;

        Ok(self
            .state
            .lock()
            .balances
            .get(&pool.name)
            .copied()
            .unwrap_or(BalanceState::Unknown))
    }
}

/// Stable 48-bit hash so the same pool name always yields the same uuid
fn fnv1a(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash & 0xffff_ffff_ffff
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn spec(name: &str, level: RaidLevel, disks: &[&str]) -> MountSpec {
        MountSpec {
            name: name.to_string(),
            raid_level: level,
            disks: disks
                .iter()
                .map(|d| PoolDisk {
                    name: d.to_string(),
                    identifier: format!("mem-{}", d),
                })
                .collect(),
            compression: Compression::Lzo,
            mount_options: MountOptions::parse("noatime").unwrap(),
        }
    }

    fn pool_from(spec: &MountSpec, mount_point: PathBuf) -> Pool {
        Pool {
            name: spec.name.clone(),
            raid_level: spec.raid_level,
            disks: spec.disks.clone(),
            compression: spec.compression,
            mount_options: spec.mount_options.clone(),
            is_root: false,
            balance_active: false,
            usage: PoolUsage::default(),
            mount_point,
            uuid: None,
            created_at: chrono::Utc::now(),
            last_balance: None,
        }
    }

    #[tokio::test]
    async fn test_mount_records_effective_options() {
        let system = InMemorySystem::new("/mnt2");
        let spec = spec("p", RaidLevel::Single, &["sdb"]);
        let mount_point = system.mount_pool(&spec).await.unwrap();

        assert_eq!(mount_point, PathBuf::from("/mnt2/p"));
        assert!(system.is_mounted("p"));
        assert_matches!(
            &system.calls()[0],
            SystemCall::MountPool { options, .. } if options == "noatime,compress=lzo"
        );

        // Mounting the same name twice fails
        assert_matches!(
            system.mount_pool(&spec).await,
            Err(Error::ExternalCommand { .. })
        );
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let system = InMemorySystem::new("/mnt2");
        system.fail_next("resolve_disk_identifier", "no such device");

        let err = system.resolve_disk_identifier("sdb").await.unwrap_err();
        assert_eq!(err.to_string(), "no such device");
        assert_eq!(
            system.resolve_disk_identifier("sdb").await.unwrap(),
            "mem-sdb"
        );
        assert_eq!(system.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_usage_follows_raid_level() {
        let system = InMemorySystem::new("/mnt2").with_disk_sizes([("sdb", 100), ("sdc", 100)]);
        let spec = spec("r1", RaidLevel::Raid1, &["sdb", "sdc"]);
        let mount_point = system.mount_pool(&spec).await.unwrap();
        let pool = pool_from(&spec, mount_point);

        system.set_used("r1", 30);
        let usage = system.pool_usage(&pool).await.unwrap();
        assert_eq!(usage.total, 100);
        assert_eq!(usage.used, 30);
        assert_eq!(usage.free, 70);
    }

    #[tokio::test]
    async fn test_unmount_is_idempotent() {
        let system = InMemorySystem::new("/mnt2");
        let spec = spec("p", RaidLevel::Single, &["sdb"]);
        let mount_point = system.mount_pool(&spec).await.unwrap();

        system.unmount_pool(&mount_point).await.unwrap();
        assert!(!system.is_mounted("p"));
        system.unmount_pool(&mount_point).await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_lifecycle() {
        let system = InMemorySystem::new("/mnt2");
        let spec = spec("p", RaidLevel::Raid0, &["sdb", "sdc"]);
        let mount_point = system.mount_pool(&spec).await.unwrap();
        let pool = pool_from(&spec, mount_point);

        assert_eq!(system.balance_status(&pool).await.unwrap(), BalanceState::Finished);
        assert_eq!(system.balance_start(&pool, Some(RaidLevel::Raid1)).await.unwrap(), 1);
        assert!(system.balance_status(&pool).await.unwrap().is_active());
        assert_eq!(system.balance_start(&pool, None).await.unwrap(), 2);
    }

    #[test]
    fn test_uuid_hash_is_stable() {
        assert_eq!(fnv1a("pool"), fnv1a("pool"));
        assert_ne!(fnv1a("pool"), fnv1a("pool2"));
    }
}
