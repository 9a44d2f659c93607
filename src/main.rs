//! poolctl
//!
//! Command line front end for the storage pool manager. Pool records and
//! the disk inventory come from a YAML inventory file; mutating commands
//! write the resulting records back to it.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_pool_manager::{
    usable_capacity, AddDisksRequest, BtrfsCommands, BtrfsConfig, CreatePoolRequest,
    DeviceDirInventory, DiskInventoryRef, Error, InMemorySystem, InventoryFile, ManagerConfig,
    PoolManager, RemountRequest, Result, SystemCommandsRef,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Pool Manager - btrfs pool lifecycle
#[derive(Parser, Debug)]
#[command(name = "poolctl", author, version, about, long_about = None)]
struct Args {
    /// Inventory file with disks and existing pools
    #[arg(long, env = "POOLCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Simulate system commands in memory; nothing is written back
    #[arg(long, env = "POOLCTL_DRY_RUN")]
    dry_run: bool,

    /// Print operation metrics to stderr on exit
    #[arg(long)]
    print_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all pools
    List,
    /// Show one pool
    Get { name: String },
    /// Create a pool
    Create(CreateArgs),
    /// Validate a create request and estimate its capacity
    PlanCreate(CreateArgs),
    /// Add disks, optionally converting the raid level
    Add {
        name: String,
        #[arg(long, value_delimiter = ',', required = true)]
        disks: Vec<String>,
        #[arg(long)]
        raid_level: Option<String>,
    },
    /// Remove disks
    Remove {
        name: String,
        #[arg(long, value_delimiter = ',', required = true)]
        disks: Vec<String>,
    },
    /// Change compression and/or mount options
    Remount {
        name: String,
        #[arg(long)]
        compression: Option<String>,
        #[arg(long)]
        mount_options: Option<String>,
    },
    /// Unmount and forget a pool
    Delete { name: String },
    /// Query the balance state of a pool
    Balance { name: String },
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
    name: String,
    #[arg(long, default_value = "single")]
    raid_level: String,
    #[arg(long, value_delimiter = ',', required = true)]
    disks: Vec<String>,
    #[arg(long)]
    compression: Option<String>,
    #[arg(long)]
    mount_options: Option<String>,
}

impl From<CreateArgs> for CreatePoolRequest {
    fn from(args: CreateArgs) -> Self {
        CreatePoolRequest {
            name: args.name,
            raid_level: args.raid_level,
            disks: args.disks,
            compression: args.compression,
            mount_options: args.mount_options,
        }
    }
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::List | Command::Get { .. } | Command::PlanCreate(_)
        )
    }
}

#[derive(Serialize)]
struct CapacityEstimate<'a> {
    plan: &'a storage_pool_manager::CreatePlan,
    /// None when a disk's size is unknown
    estimated_capacity: Option<u64>,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
    message: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args).await {
        error!("{}", e);
        let output = ErrorOutput {
            error: e.kind().to_string(),
            message: e.to_string(),
        };
        match serde_json::to_string_pretty(&output) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{}", e),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let file = match &args.config {
        Some(path) => InventoryFile::from_file(path)?,
        None => InventoryFile::default(),
    };

    info!("poolctl {} (dry run: {})", storage_pool_manager::VERSION, args.dry_run);

    let system: SystemCommandsRef = if args.dry_run {
        let sizes = file
            .disks
            .iter()
            .filter_map(|d| d.size.map(|s| (d.name.clone(), s)));
        Arc::new(InMemorySystem::new(&file.mount_root).with_disk_sizes(sizes))
    } else {
        Arc::new(BtrfsCommands::new(BtrfsConfig {
            mount_root: file.mount_root.clone(),
            ..Default::default()
        }))
    };

    let inventory: DiskInventoryRef = if file.disks.is_empty() {
        Arc::new(DeviceDirInventory::default())
    } else {
        Arc::new(file.inventory())
    };

    let manager = PoolManager::new(ManagerConfig::default(), system, inventory)?;
    for pool in file.pools.iter().cloned() {
        manager.register(pool).await?;
    }

    let mutates = args.command.mutates();
    let result = execute(&manager, &file, args.command).await;

    if args.print_metrics {
        eprintln!("{}", manager.metrics().render()?);
    }
    result?;

    if mutates && !args.dry_run {
        if let Some(path) = &args.config {
            let updated = InventoryFile {
                pools: manager.records(),
                ..file
            };
            updated.save(path)?;
            info!("Pool records written to {}", path.display());
        }
    }
    Ok(())
}

async fn execute(manager: &PoolManager, file: &InventoryFile, command: Command) -> Result<()> {
    match command {
        Command::List => print_json(&manager.list().await?),
        Command::Get { name } => print_json(&manager.get(&name).await?),
        Command::Create(create) => print_json(&manager.create(create.into()).await?),
        Command::PlanCreate(create) => {
            let plan = manager.plan_create(&create.into()).await?;
            let sizes: Option<Vec<u64>> = plan
                .disks()
                .iter()
                .map(|name| file.disks.iter().find(|d| &d.name == name).and_then(|d| d.size))
                .collect();
            print_json(&CapacityEstimate {
                plan: &plan,
                estimated_capacity: sizes.map(|s| usable_capacity(plan.raid_level(), &s)),
            })
        }
        Command::Add {
            name,
            disks,
            raid_level,
        } => print_json(
            &manager
                .add_disks(&name, AddDisksRequest { disks, raid_level })
                .await?,
        ),
        Command::Remove { name, disks } => print_json(&manager.remove_disks(&name, disks).await?),
        Command::Remount {
            name,
            compression,
            mount_options,
        } => print_json(
            &manager
                .remount(
                    &name,
                    RemountRequest {
                        compression,
                        mount_options,
                    },
                )
                .await?,
        ),
        Command::Delete { name } => {
            manager.delete(&name).await?;
            print_json(&serde_json::json!({ "deleted": name }))
        }
        Command::Balance { name } => print_json(&manager.refresh_balance(&name).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    // stdout carries command output; logs go to stderr
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
