//! Storage Pool Manager
//!
//! Lifecycle management for redundant btrfs storage pools: create, grow,
//! shrink, remount and delete, with RAID-level rules enforced before any
//! command touches the host.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Pool Lifecycle Manager                     │
//! │   plan (validate, no effects) ──► apply (system commands)      │
//! │   per-pool locks · operation metrics · pool records            │
//! ├───────────────────────────────┬───────────────────────────────┤
//! │        RAID Policy Table      │     Mount-Option Grammar      │
//! ├───────────────────────────────┴───────────────────────────────┤
//! │                          Domain Ports                          │
//! │        SystemCommands                 DiskInventory            │
//! ├───────────────────────────────────────────────────────────────┤
//! │                        System Adapters                         │
//! │   BtrfsCommands · InMemorySystem · Static/DeviceDir inventory  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`pool`]: RAID policy, mount-option grammar and the pool entity
//! - [`controlplane`]: Lifecycle manager, planning, locks and metrics
//! - [`domain`]: Ports implemented by system adapters
//! - [`system`]: Btrfs, in-memory and inventory adapters
//! - [`config`]: Inventory file loading
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod pool;
pub mod system;

// Re-export commonly used types
pub use config::{DiskEntry, InventoryFile};

pub use controlplane::{
    AddDisksRequest, CreatePlan, CreatePoolRequest, ManagerConfig, ManagerMetrics, PoolManager,
    RemountRequest,
};

pub use domain::ports::{
    BalanceState, DiskInventory, DiskInventoryRef, MountSpec, SystemCommands, SystemCommandsRef,
};

pub use error::{Error, ErrorKind, Result};

pub use pool::{
    usable_capacity, BalanceJob, Compression, MountOption, MountOptions, Pool, PoolDisk,
    PoolUsage, RaidLevel, RaidPolicy, RemovalRule,
};

pub use system::{
    BtrfsCommands, BtrfsConfig, DeviceDirInventory, InMemorySystem, StaticInventory,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
