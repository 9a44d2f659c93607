//! System Adapters
//!
//! Implementations of the domain ports:
//! - Btrfs userspace tools for live hosts
//! - An in-memory system for dry runs and tests
//! - Disk inventories from configuration or the device directory

pub mod btrfs;
pub mod inventory;
pub mod memory;

pub use btrfs::{BtrfsCommands, BtrfsConfig};
pub use inventory::{DeviceDirInventory, StaticInventory};
pub use memory::{InMemorySystem, SystemCall};
