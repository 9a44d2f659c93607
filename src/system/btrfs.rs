//! Btrfs System Commands
//!
//! Runs mkfs.btrfs, btrfs, mount and umount to carry out pool operations
//! on a live host. Output parsing lives in free functions so it can be
//! tested without the tools installed.

use crate::domain::ports::{BalanceState, MountSpec, SystemCommands};
use crate::error::{Error, Result};
use crate::pool::{Compression, MountOptions, Pool, PoolDisk, PoolUsage, RaidLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// umount exit status for "not mounted"
const UMOUNT_NOT_MOUNTED: i32 = 32;

// =============================================================================
// Btrfs Configuration
// =============================================================================

/// Tool paths and directories used by [`BtrfsCommands`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BtrfsConfig {
    pub mkfs_path: PathBuf,
    pub btrfs_path: PathBuf,
    pub mount_path: PathBuf,
    pub umount_path: PathBuf,
    /// Pools are mounted at `<mount_root>/<name>`
    pub mount_root: PathBuf,
    /// Stable device links, `/dev/disk/by-id` on a live host
    pub by_id_dir: PathBuf,
    /// Filesystem label links
    pub by_label_dir: PathBuf,
}

impl Default for BtrfsConfig {
    fn default() -> Self {
        Self {
            mkfs_path: PathBuf::from("/sbin/mkfs.btrfs"),
            btrfs_path: PathBuf::from("/sbin/btrfs"),
            mount_path: PathBuf::from("/bin/mount"),
            umount_path: PathBuf::from("/bin/umount"),
            mount_root: PathBuf::from("/mnt2"),
            by_id_dir: PathBuf::from("/dev/disk/by-id"),
            by_label_dir: PathBuf::from("/dev/disk/by-label"),
        }
    }
}

// =============================================================================
// Command Output
// =============================================================================

#[derive(Debug)]
struct CommandOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Message reported to callers: stderr, or stdout when stderr is empty
    fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

// =============================================================================
// Btrfs Commands
// =============================================================================

/// `SystemCommands` backed by the btrfs userspace tools
#[derive(Debug)]
pub struct BtrfsCommands {
    config: BtrfsConfig,
    /// btrfs has no balance ids; jobs are numbered per process
    next_job: AtomicU64,
}

impl BtrfsCommands {
    pub fn new(config: BtrfsConfig) -> Self {
        Self {
            config,
            next_job: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BtrfsConfig {
        &self.config
    }

    fn device_path(&self, disk: &PoolDisk) -> PathBuf {
        self.config.by_id_dir.join(&disk.identifier)
    }

    async fn exec(&self, operation: &str, program: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!(operation, "Running {} {}", program.display(), args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                Error::external(operation, format!("{}: {}", program.display(), e))
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }

    /// Run a command and fail on a non-zero exit
    async fn run(&self, operation: &str, program: &Path, args: &[String]) -> Result<String> {
        let output = self.exec(operation, program, args).await?;
        if !output.success() {
            warn!(
                operation,
                code = ?output.code,
                "{} failed: {}",
                program.display(),
                output.message()
            );
            return Err(Error::external(operation, output.message()));
        }
        Ok(output.stdout)
    }

    async fn btrfs(&self, operation: &str, args: Vec<String>) -> Result<String> {
        self.run(operation, &self.config.btrfs_path, &args).await
    }

    /// Mount by label, falling back to each member device in turn
    async fn mount_existing(&self, spec: &MountSpec, mount_point: &Path) -> Result<()> {
        let options = spec.mount_options.effective(spec.compression);
        let target = mount_point.display().to_string();

        let by_label = self.config.by_label_dir.join(&spec.name);
        let mut candidates = Vec::with_capacity(spec.disks.len() + 1);
        if by_label.exists() {
            candidates.push(by_label);
        }
        candidates.extend(spec.disks.iter().map(|d| self.device_path(d)));

        let mut last_error = None;
        for device in candidates {
            let args = mount_args(&device, &target, &options);
            match self.run("mount_pool", &self.config.mount_path, &args).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!("Mount of {} via {} failed: {}", spec.name, device.display(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::external(
                "mount_pool",
                format!("Cannot mount Pool({}) as it has no disks in it.", spec.name),
            )
        }))
    }
}

// =============================================================================
// Argument Builders
// =============================================================================

fn mkfs_args(spec: &MountSpec, devices: &[PathBuf]) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "-d".to_string(),
        spec.raid_level.as_str().to_string(),
        "-m".to_string(),
        spec.raid_level.metadata_profile().to_string(),
        "-L".to_string(),
        spec.name.clone(),
    ];
    args.extend(devices.iter().map(|d| d.display().to_string()));
    args
}

fn mount_args(device: &Path, target: &str, options: &str) -> Vec<String> {
    let mut args = vec![device.display().to_string(), target.to_string()];
    if !options.is_empty() {
        args.push("-o".to_string());
        args.push(options.to_string());
    }
    args
}

fn balance_args(mount_point: &Path, convert_to: Option<RaidLevel>) -> Vec<String> {
    let mut args = vec!["balance".to_string(), "start".to_string(), "--bg".to_string()];
    match convert_to {
        Some(level) => {
            args.push(format!("-mconvert={}", level));
            args.push(format!("-dconvert={}", level));
        }
        // Without filters btrfs asks for confirmation
        None => args.push("--full-balance".to_string()),
    }
    args.push(mount_point.display().to_string());
    args
}

// =============================================================================
// Output Parsers
// =============================================================================

/// Parse `btrfs filesystem usage -b`. Total is what remains storable
/// plus what is stored, so it already accounts for the data ratio.
pub fn parse_usage(output: &str) -> Result<PoolUsage> {
    let mut used = None;
    let mut free = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let number = value.split_whitespace().next().and_then(|v| v.parse::<u64>().ok());
        match key.trim() {
            "Used" => used = number,
            "Free (estimated)" => free = number,
            _ => {}
        }
    }

    match (used, free) {
        (Some(used), Some(free)) => Ok(PoolUsage {
            total: used + free,
            used,
            free,
        }),
        _ => Err(Error::external(
            "pool_usage",
            "Unrecognised output from btrfs filesystem usage",
        )),
    }
}

/// Parse the uuid from the first line of `btrfs filesystem show`
pub fn parse_uuid(output: &str) -> Result<String> {
    output
        .lines()
        .next()
        .and_then(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "uuid:")?;
            tokens.next()
        })
        .map(str::to_string)
        .ok_or_else(|| Error::external("pool_uuid", "No uuid in btrfs filesystem show output"))
}

/// Parse `btrfs balance status`
pub fn parse_balance_status(output: &str) -> BalanceState {
    let mut lines = output.lines();
    let Some(first) = lines.next() else {
        return BalanceState::Unknown;
    };

    if first.starts_with("No balance") {
        return BalanceState::Finished;
    }
    if !first.starts_with("Balance") {
        return BalanceState::Unknown;
    }

    if first.contains("cancel requested") {
        return BalanceState::Cancelling;
    }
    if first.contains("pause requested") {
        return BalanceState::Pausing;
    }
    if first.contains("paused") {
        return BalanceState::Paused;
    }

    // "2 out of about 10 chunks balanced (3 considered),  80% left"
    let percent_done = lines
        .next()
        .filter(|line| line.contains("chunks balanced"))
        .and_then(|line| line.split_whitespace().rev().nth(1))
        .and_then(|left| left.trim_end_matches('%').parse::<u8>().ok())
        .map(|left| 100u8.saturating_sub(left));

    BalanceState::Running { percent_done }
}

/// Pick the by-id link for a device: partitions excluded, wwn- links last
fn preferred_link(mut links: Vec<String>) -> Option<String> {
    links.retain(|l| !l.contains("-part"));
    links.sort_by(|a, b| (a.starts_with("wwn-"), a).cmp(&(b.starts_with("wwn-"), b)));
    links.into_iter().next()
}

#[async_trait]
impl SystemCommands for BtrfsCommands {
    async fn resolve_disk_identifier(&self, device: &str) -> Result<String> {
        let pattern = self.config.by_id_dir.join("*");
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::external("resolve_disk_identifier", e.to_string()))?;

        let links: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|link| {
                std::fs::canonicalize(link)
                    .ok()
                    .and_then(|target| target.file_name().map(|n| n == device))
                    .unwrap_or(false)
            })
            .filter_map(|link| link.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();

        preferred_link(links).ok_or_else(|| {
            debug!("No link to {} in {}", device, self.config.by_id_dir.display());
            Error::DiskNotFound {
                disk: device.to_string(),
            }
        })
    }

    async fn mount_pool(&self, spec: &MountSpec) -> Result<PathBuf> {
        let mount_point = self.config.mount_root.join(&spec.name);
        let devices: Vec<PathBuf> = spec.disks.iter().map(|d| self.device_path(d)).collect();

        info!("Formatting pool {} on {} device(s)", spec.name, devices.len());
        self.run("mount_pool", &self.config.mkfs_path, &mkfs_args(spec, &devices))
            .await?;

        tokio::fs::create_dir_all(&mount_point)
            .await
            .map_err(|e| Error::external("mount_pool", format!("{}: {}", mount_point.display(), e)))?;

        for device in &devices {
            self.btrfs(
                "mount_pool",
                vec!["device".into(), "scan".into(), device.display().to_string()],
            )
            .await?;
        }

        self.mount_existing(spec, &mount_point).await?;
        Ok(mount_point)
    }

    async fn unmount_pool(&self, mount_point: &Path) -> Result<()> {
        if !mount_point.exists() {
            debug!("{} does not exist, nothing to unmount", mount_point.display());
            return Ok(());
        }

        let args = vec!["-l".to_string(), mount_point.display().to_string()];
        let output = self
            .exec("unmount_pool", &self.config.umount_path, &args)
            .await?;

        if !output.success() {
            let not_mounted = output.code == Some(UMOUNT_NOT_MOUNTED)
                && output
                    .stderr
                    .lines()
                    .any(|l| l.trim().ends_with("not mounted"));
            if !not_mounted {
                return Err(Error::external("unmount_pool", output.message()));
            }
        }

        if let Err(e) = tokio::fs::remove_dir(mount_point).await {
            warn!("Could not remove mount point {}: {}", mount_point.display(), e);
        }
        Ok(())
    }

    async fn resize_pool(&self, pool: &Pool, added: &[PoolDisk], removed: &[PoolDisk]) -> Result<()> {
        let mount_point = pool.mount_point.display().to_string();

        if !added.is_empty() {
            let mut args = vec!["device".to_string(), "add".to_string()];
            args.extend(added.iter().map(|d| self.device_path(d).display().to_string()));
            args.push(mount_point.clone());
            self.btrfs("resize_pool", args).await?;
        }

        if !removed.is_empty() {
            let mut args = vec!["device".to_string(), "delete".to_string()];
            args.extend(removed.iter().map(|d| self.device_path(d).display().to_string()));
            args.push(mount_point);
            self.btrfs("resize_pool", args).await?;
        }
        Ok(())
    }

    async fn remount_pool(
        &self,
        pool: &Pool,
        compression: Compression,
        mount_options: &MountOptions,
    ) -> Result<()> {
        let options = format!("remount,{}", mount_options.effective(compression));
        let args = vec![
            "-o".to_string(),
            options,
            pool.mount_point.display().to_string(),
        ];
        self.run("remount_pool", &self.config.mount_path, &args)
            .await
            .map(|_| ())
    }

    async fn pool_usage(&self, pool: &Pool) -> Result<PoolUsage> {
        let output = self
            .btrfs(
                "pool_usage",
                vec![
                    "filesystem".into(),
                    "usage".into(),
                    "-b".into(),
                    pool.mount_point.display().to_string(),
                ],
            )
            .await?;
        parse_usage(&output)
    }

    async fn pool_uuid(&self, pool: &Pool) -> Result<String> {
        let output = self
            .btrfs(
                "pool_uuid",
                vec![
                    "filesystem".into(),
                    "show".into(),
                    pool.mount_point.display().to_string(),
                ],
            )
            .await?;
        parse_uuid(&output)
    }

    async fn balance_start(&self, pool: &Pool, convert_to: Option<RaidLevel>) -> Result<u64> {
        self.btrfs("balance_start", balance_args(&pool.mount_point, convert_to))
            .await?;
        Ok(self.next_job.fetch_add(1, Ordering::SeqCst))
    }

    async fn balance_status(&self, pool: &Pool) -> Result<BalanceState> {
        // Exit status is non-zero while a balance runs; only stdout matters.
        let args = vec![
            "balance".to_string(),
            "status".to_string(),
            pool.mount_point.display().to_string(),
        ];
        let output = self
            .exec("balance_status", &self.config.btrfs_path, &args)
            .await?;
        Ok(parse_balance_status(&output.stdout))
    }
}
