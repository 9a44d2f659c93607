//! Pool Lifecycle Manager
//!
//! Coordinates create, resize, remount and delete:
//! - Validates a request into a plan against current records
//! - Applies the plan through the system commands port
//! - Updates the pool record only after the external effect succeeded
//!
//! Each mutating operation holds the per-pool lock across both phases.
//! Create, add and register also hold claims on the disks they name, so two
//! pools never take the same disk.

use crate::controlplane::locks::{DiskClaims, PoolGuard, PoolLocks};
use crate::controlplane::metrics::ManagerMetrics;
use crate::controlplane::plan::{
    self, AddDisksRequest, AddPlan, CreatePlan, CreatePoolRequest, DeletePlan, PoolSnapshot,
    RemountPlan, RemountRequest, RemovePlan,
};
use crate::domain::ports::{BalanceState, DiskInventoryRef, MountSpec, SystemCommandsRef};
use crate::error::{Error, Result};
use crate::pool::{BalanceJob, Pool, PoolDisk, PoolUsage};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// =============================================================================
// Manager Configuration
// =============================================================================

/// Configuration for the lifecycle manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Query usage after each successful mutation
    pub refresh_usage: bool,
    /// Start a balance after disks are added
    pub balance_after_add: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            refresh_usage: true,
            balance_after_add: true,
        }
    }
}

// =============================================================================
// Pool Manager
// =============================================================================

/// Sole writer of pool records
pub struct PoolManager {
    config: ManagerConfig,
    system: SystemCommandsRef,
    inventory: DiskInventoryRef,
    /// Pool records by name
    pools: RwLock<BTreeMap<String, Pool>>,
    locks: PoolLocks,
    claims: DiskClaims,
    metrics: ManagerMetrics,
}

impl PoolManager {
    /// Create a new manager
    pub fn new(
        config: ManagerConfig,
        system: SystemCommandsRef,
        inventory: DiskInventoryRef,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            config,
            system,
            inventory,
            pools: RwLock::new(BTreeMap::new()),
            locks: PoolLocks::new(),
            claims: DiskClaims::new(),
            metrics: ManagerMetrics::new()?,
        }))
    }

    pub fn metrics(&self) -> &ManagerMetrics {
        &self.metrics
    }

    /// Copy of all records. Never hold the record lock across an await.
    fn snapshot(&self) -> PoolSnapshot {
        self.pools.read().clone()
    }

    fn store(&self, pool: Pool) {
        self.pools.write().insert(pool.name.clone(), pool);
    }

    /// Lock an existing pool. Unknown names fail without taking a lock entry.
    async fn lock_existing(&self, name: &str) -> Result<PoolGuard> {
        let known = self.pools.read().contains_key(name);
        if !known {
            return Err(Error::PoolNotFound {
                name: name.to_string(),
            });
        }
        Ok(self.locks.acquire(name).await)
    }

    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.metrics.observe(operation, started, &result);
        if let Err(e) = &result {
            debug!(operation, kind = %e.kind(), "Operation failed: {}", e);
        }
        result
    }

    // =========================================================================
    // Adoption
    // =========================================================================

    /// Adopt an existing pool record, such as the root pool. No external effect.
    pub async fn register(&self, pool: Pool) -> Result<()> {
        plan::validate_name(&pool.name)?;
        let _guard = self.locks.acquire(&pool.name).await;
        let disks: Vec<String> = pool.disks.iter().map(|d| d.name.clone()).collect();
        let _claim = self.claims.claim(&pool.name, &disks)?;
        plan::validate_existing(&pool, &self.snapshot())?;
        info!(
            "Registered existing pool {} ({}, {} disks, root={})",
            pool.name,
            pool.raid_level,
            pool.disks.len(),
            pool.is_root
        );
        self.store(pool);
        Ok(())
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Validate a create request without side effects
    pub async fn plan_create(&self, request: &CreatePoolRequest) -> Result<CreatePlan> {
        plan::plan_create(request, &self.snapshot(), self.inventory.as_ref()).await
    }

    /// Create a pool
    pub async fn create(&self, request: CreatePoolRequest) -> Result<Pool> {
        self.timed("create", async {
            plan::validate_name(&request.name)?;
            let _guard = self.locks.acquire(&request.name).await;
            let _claim = self.claims.claim(&request.name, &request.disks)?;
            let plan = self.plan_create(&request).await?;
            self.apply_create(plan).await
        })
        .await
    }

    pub(crate) async fn apply_create(&self, plan: CreatePlan) -> Result<Pool> {
        // Identifiers first; nothing on the host changes until mount.
        let mut disks = Vec::with_capacity(plan.disks.len());
        for name in &plan.disks {
            let identifier = self.system.resolve_disk_identifier(name).await?;
            disks.push(PoolDisk {
                name: name.clone(),
                identifier,
            });
        }

        let spec = MountSpec {
            name: plan.name.clone(),
            raid_level: plan.raid_level,
            disks,
            compression: plan.compression,
            mount_options: plan.mount_options,
        };

        info!(
            "Creating pool {} ({}, {} disks)",
            spec.name,
            spec.raid_level,
            spec.disks.len()
        );

        let mount_point = self.system.mount_pool(&spec).await.map_err(|e| {
            error!("Failed to create pool {}: {}", spec.name, e);
            e
        })?;

        let mut pool = Pool {
            name: spec.name,
            raid_level: spec.raid_level,
            disks: spec.disks,
            compression: spec.compression,
            mount_options: spec.mount_options,
            is_root: false,
            balance_active: false,
            usage: PoolUsage::default(),
            mount_point,
            uuid: None,
            created_at: Utc::now(),
            last_balance: None,
        };

        match self.system.pool_uuid(&pool).await {
            Ok(uuid) => pool.uuid = Some(uuid),
            Err(e) => warn!("Could not read uuid of pool {}: {}", pool.name, e),
        }
        self.refresh_usage(&mut pool).await;

        info!("Pool {} created at {}", pool.name, pool.mount_point.display());
        self.store(pool.clone());
        Ok(pool)
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Validate an add-disks request without side effects
    pub async fn plan_add(&self, name: &str, request: &AddDisksRequest) -> Result<AddPlan> {
        plan::plan_add(name, request, &self.snapshot(), self.inventory.as_ref()).await
    }

    /// Add disks to a pool, optionally converting its raid level
    pub async fn add_disks(&self, name: &str, request: AddDisksRequest) -> Result<Pool> {
        self.timed("add_disks", async {
            let _guard = self.lock_existing(name).await?;
            let _claim = self.claims.claim(name, &request.disks)?;
            let plan = self.plan_add(name, &request).await?;
            self.apply_add(plan).await
        })
        .await
    }

    pub(crate) async fn apply_add(&self, plan: AddPlan) -> Result<Pool> {
        let mut added = Vec::with_capacity(plan.disks.len());
        for name in &plan.disks {
            let identifier = self.system.resolve_disk_identifier(name).await?;
            added.push(PoolDisk {
                name: name.clone(),
                identifier,
            });
        }

        info!(
            "Adding {} disk(s) to pool {}",
            added.len(),
            plan.pool.name
        );
        self.system
            .resize_pool(&plan.pool, &added, &[])
            .await
            .map_err(|e| {
                error!("Failed to add disks to pool {}: {}", plan.pool.name, e);
                e
            })?;

        let mut pool = plan.pool;
        pool.disks.extend(added);

        if self.config.balance_after_add || plan.convert_to.is_some() {
            match self.system.balance_start(&pool, plan.convert_to).await {
                Ok(job_id) => {
                    info!(
                        "Started balance {} on pool {} (convert: {:?})",
                        job_id, pool.name, plan.convert_to
                    );
                    pool.last_balance = Some(BalanceJob {
                        job_id,
                        convert_to: plan.convert_to,
                        started_at: Utc::now(),
                    });
                    if let Some(target) = plan.convert_to {
                        pool.raid_level = target;
                    }
                }
                Err(e) => {
                    // The devices are already members; keep the record truthful.
                    error!("Disks added to pool {} but balance failed: {}", pool.name, e);
                    self.store(pool);
                    return Err(e);
                }
            }
        }

        self.refresh_usage(&mut pool).await;
        self.store(pool.clone());
        Ok(pool)
    }

    /// Remove disks from a pool
    pub async fn remove_disks(&self, name: &str, disks: Vec<String>) -> Result<Pool> {
        self.timed("remove_disks", async {
            let _guard = self.lock_existing(name).await?;
            let plan = self.plan_remove(name, &disks)?;
            self.apply_remove(plan).await
        })
        .await
    }

    /// Validate a remove-disks request without side effects
    pub fn plan_remove(&self, name: &str, disks: &[String]) -> Result<RemovePlan> {
        plan::plan_remove(name, disks, &self.snapshot())
    }

    pub(crate) async fn apply_remove(&self, plan: RemovePlan) -> Result<Pool> {
        info!(
            "Removing {} disk(s) from pool {}",
            plan.removed.len(),
            plan.pool.name
        );
        self.system
            .resize_pool(&plan.pool, &[], &plan.removed)
            .await
            .map_err(|e| {
                error!("Failed to remove disks from pool {}: {}", plan.pool.name, e);
                e
            })?;

        let mut pool = plan.pool;
        pool.disks
            .retain(|d| !plan.removed.iter().any(|r| r.name == d.name));

        self.refresh_usage(&mut pool).await;
        self.store(pool.clone());
        Ok(pool)
    }

    // =========================================================================
    // Remount
    // =========================================================================

    /// Validate a remount request without side effects
    pub fn plan_remount(&self, name: &str, request: &RemountRequest) -> Result<RemountPlan> {
        plan::plan_remount(name, request, &self.snapshot())
    }

    /// Change compression and/or mount options. Both apply together or neither does.
    pub async fn remount(&self, name: &str, request: RemountRequest) -> Result<Pool> {
        self.timed("remount", async {
            let _guard = self.lock_existing(name).await?;
            let plan = self.plan_remount(name, &request)?;
            self.apply_remount(plan).await
        })
        .await
    }

    pub(crate) async fn apply_remount(&self, plan: RemountPlan) -> Result<Pool> {
        info!(
            "Remounting pool {} with {}",
            plan.pool.name,
            plan.mount_options.effective(plan.compression)
        );
        self.system
            .remount_pool(&plan.pool, plan.compression, &plan.mount_options)
            .await
            .map_err(|e| {
                error!("Failed to remount pool {}: {}", plan.pool.name, e);
                e
            })?;

        let mut pool = plan.pool;
        pool.compression = plan.compression;
        pool.mount_options = plan.mount_options;

        self.refresh_usage(&mut pool).await;
        self.store(pool.clone());
        Ok(pool)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Validate a delete request without side effects
    pub fn plan_delete(&self, name: &str) -> Result<DeletePlan> {
        plan::plan_delete(name, &self.snapshot())
    }

    /// Unmount and forget a pool
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.timed("delete", async {
            let _guard = self.lock_existing(name).await?;
            let plan = self.plan_delete(name)?;
            self.apply_delete(plan).await
        })
        .await
    }

    pub(crate) async fn apply_delete(&self, plan: DeletePlan) -> Result<()> {
        info!(
            "Deleting pool {} (unmounting {})",
            plan.pool.name,
            plan.pool.mount_point.display()
        );
        self.system
            .unmount_pool(&plan.pool.mount_point)
            .await
            .map_err(|e| {
                error!("Failed to unmount pool {}: {}", plan.pool.name, e);
                e
            })?;

        self.pools.write().remove(&plan.pool.name);
        info!("Pool {} deleted", plan.pool.name);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a pool with freshly queried usage
    pub async fn get(&self, name: &str) -> Result<Pool> {
        let mut pool = self
            .pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PoolNotFound {
                name: name.to_string(),
            })?;

        pool.usage = self.system.pool_usage(&pool).await?;
        if let Some(stored) = self.pools.write().get_mut(name) {
            stored.usage = pool.usage;
        }
        Ok(pool)
    }

    /// All pools ordered by name. Failed usage queries keep the last value.
    pub async fn list(&self) -> Result<Vec<Pool>> {
        let mut pools: Vec<Pool> = self.snapshot().into_values().collect();
        for pool in pools.iter_mut() {
            match self.system.pool_usage(pool).await {
                Ok(usage) => {
                    pool.usage = usage;
                    if let Some(stored) = self.pools.write().get_mut(&pool.name) {
                        stored.usage = usage;
                    }
                }
                Err(e) => warn!("Usage refresh failed for pool {}: {}", pool.name, e),
            }
        }
        Ok(pools)
    }

    /// Names of all pools
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }

    /// Stored records as they are, without querying the system
    pub fn records(&self) -> Vec<Pool> {
        self.pools.read().values().cloned().collect()
    }

    // =========================================================================
    // Balance Coordination
    // =========================================================================

    /// Toggle `balance_active` on behalf of the rebalance subsystem
    pub async fn set_balance_active(&self, name: &str, active: bool) -> Result<()> {
        let _guard = self.lock_existing(name).await?;
        let mut pools = self.pools.write();
        let pool = pools.get_mut(name).ok_or_else(|| Error::PoolNotFound {
            name: name.to_string(),
        })?;
        if pool.balance_active != active {
            info!("Pool {} balance_active -> {}", name, active);
        }
        pool.balance_active = active;
        Ok(())
    }

    /// Query the balance state and update `balance_active` from it
    pub async fn refresh_balance(&self, name: &str) -> Result<BalanceState> {
        let _guard = self.lock_existing(name).await?;
        let pool = self
            .pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PoolNotFound {
                name: name.to_string(),
            })?;

        let state = self.system.balance_status(&pool).await?;
        debug!(pool = %name, %state, "Balance state queried");

        if let Some(stored) = self.pools.write().get_mut(name) {
            stored.balance_active = state.is_active();
        }
        Ok(state)
    }

    async fn refresh_usage(&self, pool: &mut Pool) {
        if !self.config.refresh_usage {
            return;
        }
        match self.system.pool_usage(pool).await {
            Ok(usage) => pool.usage = usage,
            Err(e) => warn!("Usage refresh failed for pool {}: {}", pool.name, e),
        }
    }
}
