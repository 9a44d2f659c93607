//! Request Validation
//!
//! The first phase of every lifecycle operation. A plan is only produced
//! when every rule holds against a snapshot of the pool records and the
//! disk inventory; building one never touches the host system.

use crate::domain::ports::DiskInventory;
use crate::error::{Error, Result};
use crate::pool::{Compression, MountOptions, Pool, PoolDisk, RaidLevel, RemovalRule};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

static POOL_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("pool name regex"));

/// Pool records keyed by name
pub type PoolSnapshot = BTreeMap<String, Pool>;

// =============================================================================
// Requests
// =============================================================================

/// Request to create a pool. Tags arrive as strings and are parsed here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePoolRequest {
    pub name: String,
    pub raid_level: String,
    pub disks: Vec<String>,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub mount_options: Option<String>,
}

/// Request to grow a pool, optionally converting its raid level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddDisksRequest {
    pub disks: Vec<String>,
    #[serde(default)]
    pub raid_level: Option<String>,
}

/// Request to change compression and/or mount options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemountRequest {
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub mount_options: Option<String>,
}

// =============================================================================
// Plans
// =============================================================================

/// Validated create request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePlan {
    pub(crate) name: String,
    pub(crate) raid_level: RaidLevel,
    pub(crate) disks: Vec<String>,
    pub(crate) compression: Compression,
    pub(crate) mount_options: MountOptions,
}

impl CreatePlan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raid_level(&self) -> RaidLevel {
        self.raid_level
    }

    pub fn disks(&self) -> &[String] {
        &self.disks
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn mount_options(&self) -> &MountOptions {
        &self.mount_options
    }
}

/// Validated add-disks request
#[derive(Debug, Clone, PartialEq)]
pub struct AddPlan {
    pub(crate) pool: Pool,
    pub(crate) disks: Vec<String>,
    pub(crate) convert_to: Option<RaidLevel>,
}

impl AddPlan {
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    pub fn disks(&self) -> &[String] {
        &self.disks
    }

    pub fn convert_to(&self) -> Option<RaidLevel> {
        self.convert_to
    }
}

/// Validated remove-disks request
#[derive(Debug, Clone, PartialEq)]
pub struct RemovePlan {
    pub(crate) pool: Pool,
    pub(crate) removed: Vec<PoolDisk>,
}

impl RemovePlan {
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    pub fn removed(&self) -> &[PoolDisk] {
        &self.removed
    }
}

/// Validated remount request
#[derive(Debug, Clone, PartialEq)]
pub struct RemountPlan {
    pub(crate) pool: Pool,
    pub(crate) compression: Compression,
    pub(crate) mount_options: MountOptions,
}

impl RemountPlan {
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn mount_options(&self) -> &MountOptions {
        &self.mount_options
    }
}

/// Validated delete request
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    pub(crate) pool: Pool,
}

impl DeletePlan {
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }
}

// =============================================================================
// Shared Rules
// =============================================================================

/// Check a pool name against the naming rule
pub fn validate_name(name: &str) -> Result<()> {
    if POOL_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName {
            name: name.to_string(),
        })
    }
}

fn parse_compression(value: Option<&str>, current: Compression) -> Result<Compression> {
    match value {
        Some(v) => v.parse(),
        None => Ok(current),
    }
}

fn parse_mount_options(value: Option<&str>, current: &MountOptions) -> Result<MountOptions> {
    match value {
        Some(v) => MountOptions::parse(v),
        None => Ok(current.clone()),
    }
}

/// Pool that already owns `disk`, if any
fn owner_of<'a>(pools: &'a PoolSnapshot, disk: &str) -> Option<&'a Pool> {
    pools
        .values()
        .find(|pool| pool.disks.iter().any(|d| d.name == disk))
}

/// Non-empty, no repeats, all in inventory, none owned by a pool
async fn validate_new_disks(
    disks: &[String],
    pools: &PoolSnapshot,
    inventory: &dyn DiskInventory,
) -> Result<()> {
    if disks.is_empty() {
        return Err(Error::NoDisksSpecified);
    }

    let mut seen = HashSet::new();
    for disk in disks {
        if !seen.insert(disk.as_str()) {
            return Err(Error::DuplicateDisk { disk: disk.clone() });
        }
        if !inventory.contains(disk).await? {
            return Err(Error::DiskNotFound { disk: disk.clone() });
        }
        if let Some(owner) = owner_of(pools, disk) {
            return Err(Error::DiskInUse {
                disk: disk.clone(),
                pool: owner.name.clone(),
            });
        }
    }
    Ok(())
}

fn find_pool<'a>(pools: &'a PoolSnapshot, name: &str) -> Result<&'a Pool> {
    pools.get(name).ok_or_else(|| Error::PoolNotFound {
        name: name.to_string(),
    })
}

fn ensure_not_root(pool: &Pool) -> Result<()> {
    if pool.is_root {
        return Err(Error::RootPoolProtected {
            name: pool.name.clone(),
        });
    }
    Ok(())
}

fn ensure_no_balance(pool: &Pool) -> Result<()> {
    if pool.balance_active {
        return Err(Error::BalanceInProgress {
            name: pool.name.clone(),
        });
    }
    Ok(())
}

// =============================================================================
// Planning
// =============================================================================

/// Validate a create request
pub async fn plan_create(
    request: &CreatePoolRequest,
    pools: &PoolSnapshot,
    inventory: &dyn DiskInventory,
) -> Result<CreatePlan> {
    validate_name(&request.name)?;
    if pools.contains_key(&request.name) {
        return Err(Error::DuplicatePool {
            name: request.name.clone(),
        });
    }

    validate_new_disks(&request.disks, pools, inventory).await?;

    let raid_level: RaidLevel = request.raid_level.parse()?;
    raid_level
        .policy()
        .check_disk_count(raid_level, request.disks.len())?;

    let compression = parse_compression(request.compression.as_deref(), Compression::No)?;
    let mount_options =
        parse_mount_options(request.mount_options.as_deref(), &MountOptions::new())?;

    debug!(
        pool = %request.name,
        raid = %raid_level,
        disks = request.disks.len(),
        "Create request validated"
    );

    Ok(CreatePlan {
        name: request.name.clone(),
        raid_level,
        disks: request.disks.clone(),
        compression,
        mount_options,
    })
}

/// Validate an add-disks request
pub async fn plan_add(
    name: &str,
    request: &AddDisksRequest,
    pools: &PoolSnapshot,
    inventory: &dyn DiskInventory,
) -> Result<AddPlan> {
    let pool = find_pool(pools, name)?;
    ensure_not_root(pool)?;
    ensure_no_balance(pool)?;

    validate_new_disks(&request.disks, pools, inventory).await?;

    let resulting = pool.disks.len() + request.disks.len();
    let convert_to = match request.raid_level.as_deref() {
        Some(level) => Some(level.parse::<RaidLevel>()?).filter(|l| *l != pool.raid_level),
        None => None,
    };

    match convert_to {
        Some(target) => target.policy().check_disk_count(target, resulting)?,
        None => {
            if pool.raid_level.policy().even_required && resulting % 2 != 0 {
                return Err(Error::UnevenDiskCount {
                    count: request.disks.len(),
                });
            }
        }
    }

    debug!(pool = %name, added = request.disks.len(), ?convert_to, "Add request validated");

    Ok(AddPlan {
        pool: pool.clone(),
        disks: request.disks.clone(),
        convert_to,
    })
}

/// Validate a remove-disks request
pub fn plan_remove(name: &str, disks: &[String], pools: &PoolSnapshot) -> Result<RemovePlan> {
    let pool = find_pool(pools, name)?;
    ensure_not_root(pool)?;
    ensure_no_balance(pool)?;

    let level = pool.raid_level;
    let policy = level.policy();
    let batch = match policy.removal {
        RemovalRule::Forbidden => {
            return Err(Error::RemovalNotSupported {
                level: level.to_string(),
            })
        }
        RemovalRule::ExactBatch(batch) => batch,
    };

    if disks.len() != batch {
        return Err(Error::WrongRemovalBatchSize {
            level: level.to_string(),
            batch,
            got: disks.len(),
        });
    }

    let mut seen = HashSet::new();
    let mut removed = Vec::with_capacity(disks.len());
    for disk in disks {
        if !seen.insert(disk.as_str()) {
            return Err(Error::DuplicateDisk { disk: disk.clone() });
        }
        let member = pool
            .disks
            .iter()
            .find(|d| &d.name == disk)
            .ok_or_else(|| Error::DiskNotInPool {
                disk: disk.clone(),
                pool: pool.name.clone(),
            })?;
        removed.push(member.clone());
    }

    let remaining = pool.disks.len() - removed.len();
    if remaining < policy.min_disks {
        return Err(Error::InsufficientDisksRemaining {
            level: level.to_string(),
            min_disks: policy.min_disks,
            remaining,
        });
    }

    debug!(pool = %name, removed = removed.len(), remaining, "Remove request validated");

    Ok(RemovePlan {
        pool: pool.clone(),
        removed,
    })
}

/// Validate a remount request. Absent fields keep their current values.
pub fn plan_remount(
    name: &str,
    request: &RemountRequest,
    pools: &PoolSnapshot,
) -> Result<RemountPlan> {
    let pool = find_pool(pools, name)?;
    ensure_not_root(pool)?;

    let compression = parse_compression(request.compression.as_deref(), pool.compression)?;
    let mount_options =
        parse_mount_options(request.mount_options.as_deref(), &pool.mount_options)?;

    Ok(RemountPlan {
        pool: pool.clone(),
        compression,
        mount_options,
    })
}

/// Validate a delete request
pub fn plan_delete(name: &str, pools: &PoolSnapshot) -> Result<DeletePlan> {
    let pool = find_pool(pools, name)?;
    ensure_not_root(pool)?;
    Ok(DeletePlan { pool: pool.clone() })
}

/// Validate an existing record before adopting it
pub fn validate_existing(pool: &Pool, pools: &PoolSnapshot) -> Result<()> {
    validate_name(&pool.name)?;
    if pools.contains_key(&pool.name) {
        return Err(Error::DuplicatePool {
            name: pool.name.clone(),
        });
    }

    let mut seen = HashSet::new();
    for disk in &pool.disks {
        if !seen.insert(disk.name.as_str()) {
            return Err(Error::DuplicateDisk {
                disk: disk.name.clone(),
            });
        }
        if let Some(owner) = owner_of(pools, &disk.name) {
            return Err(Error::DiskInUse {
                disk: disk.name.clone(),
                pool: owner.name.clone(),
            });
        }
    }

    pool.raid_level
        .policy()
        .check_disk_count(pool.raid_level, pool.disks.len())
}
