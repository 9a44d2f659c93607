//! Domain Ports - Boundaries between pool policy and the host system
//!
//! The lifecycle manager never runs a command itself. Everything that
//! touches devices, mounts or the filesystem goes through these traits so
//! the policy layer can be exercised against an in-memory system.

use crate::error::Result;
use crate::pool::{Compression, MountOptions, Pool, PoolDisk, PoolUsage, RaidLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Mount Spec
// =============================================================================

/// Everything needed to format and mount a new pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSpec {
    pub name: String,
    pub raid_level: RaidLevel,
    /// Member disks with identifiers already resolved
    pub disks: Vec<PoolDisk>,
    pub compression: Compression,
    pub mount_options: MountOptions,
}

// =============================================================================
// Balance State
// =============================================================================

/// State of the rebalance job on a pool, as reported by the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceState {
    Running { percent_done: Option<u8> },
    Pausing,
    Paused,
    Cancelling,
    Finished,
    Unknown,
}

impl BalanceState {
    /// Whether a balance still owns the pool
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BalanceState::Running { .. }
                | BalanceState::Pausing
                | BalanceState::Paused
                | BalanceState::Cancelling
        )
    }
}

impl std::fmt::Display for BalanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceState::Running {
                percent_done: Some(p),
            } => write!(f, "running ({}%)", p),
            BalanceState::Running { percent_done: None } => write!(f, "running"),
            BalanceState::Pausing => write!(f, "pausing"),
            BalanceState::Paused => write!(f, "paused"),
            BalanceState::Cancelling => write!(f, "cancelling"),
            BalanceState::Finished => write!(f, "finished"),
            BalanceState::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// System Commands Port
// =============================================================================

/// Port for privileged filesystem operations.
///
/// Every method may fail; implementations report failures as
/// `Error::ExternalCommand` carrying the underlying message unmodified.
#[async_trait]
pub trait SystemCommands: Send + Sync {
    /// Resolve a device name to a stable identifier. Fails with
    /// `Error::DiskNotFound` when the device has none.
    async fn resolve_disk_identifier(&self, device: &str) -> Result<String>;

    /// Format and mount a new pool, returning its mount point
    async fn mount_pool(&self, spec: &MountSpec) -> Result<PathBuf>;

    /// Unmount a pool. Succeeds if it is already unmounted.
    async fn unmount_pool(&self, mount_point: &Path) -> Result<()>;

    /// Add and/or remove member devices
    async fn resize_pool(&self, pool: &Pool, added: &[PoolDisk], removed: &[PoolDisk])
        -> Result<()>;

    /// Remount with a new compression and option set
    async fn remount_pool(
        &self,
        pool: &Pool,
        compression: Compression,
        mount_options: &MountOptions,
    ) -> Result<()>;

    /// Query space accounting
    async fn pool_usage(&self, pool: &Pool) -> Result<PoolUsage>;

    /// Query the filesystem UUID
    async fn pool_uuid(&self, pool: &Pool) -> Result<String>;

    /// Start a rebalance, optionally converting to another raid level
    async fn balance_start(&self, pool: &Pool, convert_to: Option<RaidLevel>) -> Result<u64>;

    /// Query the rebalance state
    async fn balance_status(&self, pool: &Pool) -> Result<BalanceState>;
}

// =============================================================================
// Disk Inventory Port
// =============================================================================

/// Port for the external disk inventory
#[async_trait]
pub trait DiskInventory: Send + Sync {
    /// Check whether a device is known
    async fn contains(&self, device: &str) -> Result<bool>;

    /// List known device names
    async fn list(&self) -> Result<Vec<String>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type SystemCommandsRef = Arc<dyn SystemCommands>;
pub type DiskInventoryRef = Arc<dyn DiskInventory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_state_activity() {
        assert!(BalanceState::Running { percent_done: None }.is_active());
        assert!(BalanceState::Paused.is_active());
        assert!(!BalanceState::Finished.is_active());
        assert!(!BalanceState::Unknown.is_active());
    }

    #[test]
    fn test_balance_state_display() {
        let state = BalanceState::Running {
            percent_done: Some(42),
        };
        assert_eq!(format!("{}", state), "running (42%)");
        assert_eq!(format!("{}", BalanceState::Finished), "finished");
    }
}
