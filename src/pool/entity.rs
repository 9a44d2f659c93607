//! Pool Entity
//!
//! Plain data for a managed pool. All rules live in the lifecycle manager;
//! nothing here mutates itself.

use crate::pool::mount_options::{Compression, MountOptions};
use crate::pool::raid::RaidLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A disk associated with a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDisk {
    /// Device name from the inventory (e.g. sdb)
    pub name: String,
    /// Stable identifier resolved when the disk joined the pool
    pub identifier: String,
}

/// Space accounting reported by the filesystem, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// A balance job started by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceJob {
    pub job_id: u64,
    /// Raid level the balance converts to, if any
    pub convert_to: Option<RaidLevel>,
    pub started_at: DateTime<Utc>,
}

/// A redundant storage pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub raid_level: RaidLevel,
    pub disks: Vec<PoolDisk>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub mount_options: MountOptions,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub balance_active: bool,
    #[serde(default)]
    pub usage: PoolUsage,
    pub mount_point: PathBuf,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_balance: Option<BalanceJob>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_record_defaults() {
        let yaml = r#"
name: rockstor_rockstor
raid_level: single
disks:
  - name: sda
    identifier: ata-QEMU_HARDDISK_QM00005
mount_point: /mnt2/rockstor_rockstor
is_root: true
"#;
        let pool: Pool = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pool.raid_level, RaidLevel::Single);
        assert_eq!(pool.compression, Compression::No);
        assert!(pool.mount_options.is_empty());
        assert!(pool.is_root);
        assert!(!pool.balance_active);
        assert_eq!(pool.usage, PoolUsage::default());
        assert!(pool.last_balance.is_none());
    }
}
