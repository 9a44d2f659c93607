//! Pool Control Plane
//!
//! The lifecycle manager and its supporting pieces: request planning,
//! per-pool locks, disk claims and operation metrics.

pub mod locks;
pub mod manager;
pub mod metrics;
pub mod plan;

pub use locks::{ClaimGuard, DiskClaims, PoolGuard, PoolLocks};
pub use manager::{ManagerConfig, PoolManager};
pub use metrics::ManagerMetrics;
pub use plan::{
    AddDisksRequest, AddPlan, CreatePlan, CreatePoolRequest, DeletePlan, PoolSnapshot,
    RemountPlan, RemountRequest, RemovePlan,
};
