//! Inventory File
//!
//! YAML description of the host: where pools mount, which disks exist
//! and which pools already exist (the root pool included).
//!
//! ```yaml
//! mount_root: /mnt2
//! disks:
//!   - name: sda
//!   - name: sdb
//!     size: 4000787030016
//! pools:
//!   - name: rockstor_rockstor
//!     raid_level: single
//!     is_root: true
//!     mount_point: /mnt2/rockstor_rockstor
//!     disks:
//!       - name: sda
//!         identifier: ata-QEMU_HARDDISK_QM00005
//! ```

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::system::inventory::StaticInventory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A disk known to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEntry {
    pub name: String,
    /// Size in bytes, used for capacity estimates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Host inventory and pool records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,
    #[serde(default)]
    pub disks: Vec<DiskEntry>,
    #[serde(default)]
    pub pools: Vec<Pool>,
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/mnt2")
}

impl Default for InventoryFile {
    fn default() -> Self {
        Self {
            mount_root: default_mount_root(),
            disks: Vec::new(),
            pools: Vec::new(),
        }
    }
}

impl InventoryFile {
    /// Load from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let file: Self = serde_yaml::from_str(&content)?;
        debug!(
            "Loaded inventory from {}: {} disks, {} pools",
            path.display(),
            file.disks.len(),
            file.pools.len()
        );
        Ok(file)
    }

    /// Write back as YAML, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// The disk list as an inventory
    pub fn inventory(&self) -> StaticInventory {
        self.disks
            .iter()
            .fold(StaticInventory::new(), |inv, disk| {
                inv.with_disk(disk.name.clone(), disk.size)
            })
    }
}
