//! Pool Model
//!
//! The RAID policy table, the mount-option grammar and the pool entity.

pub mod entity;
pub mod mount_options;
pub mod raid;

pub use entity::{BalanceJob, Pool, PoolDisk, PoolUsage};
pub use mount_options::{Compression, FlagOption, IntegerOption, MountOption, MountOptions};
pub use raid::{usable_capacity, RaidLevel, RaidPolicy, RemovalRule};
