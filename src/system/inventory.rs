//! Disk Inventory Adapters
//!
//! A fixed inventory loaded from configuration, and one that lists the
//! block devices present under a sysfs-style directory.

use crate::domain::ports::DiskInventory;
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::debug;

// =============================================================================
// Static Inventory
// =============================================================================

/// Inventory with a fixed set of disks and optional sizes in bytes
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    disks: IndexMap<String, Option<u64>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory of names with unknown sizes
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disks: names.into_iter().map(|n| (n.into(), None)).collect(),
        }
    }

    /// Add a disk, replacing any earlier entry of the same name
    pub fn with_disk(mut self, name: impl Into<String>, size_bytes: Option<u64>) -> Self {
        self.disks.insert(name.into(), size_bytes);
        self
    }

    /// Known size of a disk
    pub fn size_of(&self, name: &str) -> Option<u64> {
        self.disks.get(name).copied().flatten()
    }

    /// Disks with a known size
    pub fn sizes(&self) -> impl Iterator<Item = (&str, u64)> {
        self.disks
            .iter()
            .filter_map(|(name, size)| size.map(|s| (name.as_str(), s)))
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }
}

#[async_trait]
impl DiskInventory for StaticInventory {
    async fn contains(&self, device: &str) -> Result<bool> {
        Ok(self.disks.contains_key(device))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.disks.keys().cloned().collect())
    }
}

// =============================================================================
// Device Directory Inventory
// =============================================================================

/// Device name prefixes that are never pool members
const IGNORED_PREFIXES: [&str; 5] = ["loop", "ram", "dm-", "sr", "zram"];

/// Inventory read from a directory with one entry per block device
#[derive(Debug, Clone)]
pub struct DeviceDirInventory {
    /// Directory to list, `/sys/block` on a live host
    pub block_dir: PathBuf,
}

impl Default for DeviceDirInventory {
    fn default() -> Self {
        Self {
            block_dir: PathBuf::from("/sys/block"),
        }
    }
}

impl DeviceDirInventory {
    pub fn new(block_dir: impl Into<PathBuf>) -> Self {
        Self {
            block_dir: block_dir.into(),
        }
    }

    fn scan(&self) -> Result<Vec<String>> {
        let pattern = self.block_dir.join("*");
        let pattern = pattern.to_str().ok_or_else(|| {
            Error::Configuration(format!(
                "Block device directory is not valid UTF-8: {:?}",
                self.block_dir
            ))
        })?;

        let entries = glob::glob(pattern)
            .map_err(|e| Error::Configuration(format!("Invalid device pattern: {}", e)))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .filter(|name| !IGNORED_PREFIXES.iter().any(|p| name.starts_with(p)))
            .collect();
        names.sort();

        debug!("Found {} block devices in {:?}", names.len(), self.block_dir);
        Ok(names)
    }
}

#[async_trait]
impl DiskInventory for DeviceDirInventory {
    async fn contains(&self, device: &str) -> Result<bool> {
        Ok(self.scan()?.iter().any(|name| name == device))
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.scan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_inventory() {
        let inventory = StaticInventory::from_names(["sdb", "sdc"]).with_disk("sdd", Some(5 << 30));

        assert!(inventory.contains("sdb").await.unwrap());
        assert!(!inventory.contains("sdz").await.unwrap());
        assert_eq!(inventory.list().await.unwrap(), vec!["sdb", "sdc", "sdd"]);
        assert_eq!(inventory.size_of("sdd"), Some(5 << 30));
        assert_eq!(inventory.size_of("sdb"), None);
        assert_eq!(inventory.sizes().count(), 1);
    }

    #[tokio::test]
    async fn test_device_dir_inventory() {
        let dir = TempDir::new().unwrap();
        for name in ["sdb", "sdc", "nvme0n1", "loop0", "ram1", "dm-0", "sr0"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let inventory = DeviceDirInventory::new(dir.path());
        assert_eq!(
            inventory.list().await.unwrap(),
            vec!["nvme0n1", "sdb", "sdc"]
        );
        assert!(inventory.contains("sdb").await.unwrap());
        assert!(!inventory.contains("loop0").await.unwrap());
    }

    #[tokio::test]
    async fn test_device_dir_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let inventory = DeviceDirInventory::new(dir.path().join("absent"));
        assert!(inventory.list().await.unwrap().is_empty());
    }
}
