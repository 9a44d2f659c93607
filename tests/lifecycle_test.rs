//! End-to-end pool lifecycle against the in-memory system

use assert_matches::assert_matches;
use std::sync::Arc;
use storage_pool_manager::system::memory::SystemCall;
use storage_pool_manager::{
    AddDisksRequest, BalanceState, CreatePoolRequest, Error, ErrorKind, InMemorySystem,
    InventoryFile, ManagerConfig, PoolManager, RaidLevel, RemountRequest, StaticInventory,
};

const GB: u64 = 1_000_000_000;

fn manager_with(disks: &[(&str, u64)]) -> (Arc<PoolManager>, Arc<InMemorySystem>) {
    let system = Arc::new(
        InMemorySystem::new("/mnt2").with_disk_sizes(disks.iter().map(|(n, s)| (*n, *s))),
    );
    let inventory = disks
        .iter()
        .fold(StaticInventory::new(), |inv, (n, s)| inv.with_disk(*n, Some(*s)));
    let manager =
        PoolManager::new(ManagerConfig::default(), system.clone(), Arc::new(inventory)).unwrap();
    (manager, system)
}

fn request(name: &str, level: &str, disks: &[&str]) -> CreatePoolRequest {
    CreatePoolRequest {
        name: name.into(),
        raid_level: level.into(),
        disks: disks.iter().map(|d| d.to_string()).collect(),
        ..Default::default()
    }
}

fn add(disks: &[&str]) -> AddDisksRequest {
    AddDisksRequest {
        disks: disks.iter().map(|d| d.to_string()).collect(),
        raid_level: None,
    }
}

#[tokio::test]
async fn raid0_pool_lifecycle() {
    let (manager, system) =
        manager_with(&[("sdb", 100 * GB), ("sdc", 100 * GB), ("sdd", 100 * GB)]);

    let pool = manager
        .create(request("raid0pool", "raid0", &["sdb", "sdc"]))
        .await
        .unwrap();
    assert_eq!(pool.raid_level, RaidLevel::Raid0);
    assert_eq!(pool.usage.total, 200 * GB);

    let pool = manager.add_disks("raid0pool", add(&["sdd"])).await.unwrap();
    assert_eq!(pool.disks.len(), 3);
    assert_eq!(pool.usage.total, 300 * GB);
    assert!(pool.last_balance.is_some());

    let err = manager
        .remove_disks("raid0pool", vec!["sdd".into()])
        .await
        .unwrap_err();
    assert_matches!(err, Error::RemovalNotSupported { .. });
    assert_eq!(
        err.to_string(),
        "Disks cannot be removed from a pool with this raid(raid0) configuration"
    );

    manager.delete("raid0pool").await.unwrap();
    assert!(manager.list().await.unwrap().is_empty());
    assert!(!system.is_mounted("raid0pool"));
}

#[tokio::test]
async fn raid1_shrinks_one_disk_at_a_time() {
    let (manager, _) = manager_with(&[
        ("sdb", 100 * GB),
        ("sdc", 100 * GB),
        ("sdd", 100 * GB),
        ("sde", 100 * GB),
    ]);

    manager
        .create(request("raid1pool", "raid1", &["sdb", "sdc", "sdd", "sde"]))
        .await
        .unwrap();

    let err = manager
        .remove_disks("raid1pool", vec!["sdd".into(), "sde".into()])
        .await
        .unwrap_err();
    assert_matches!(err, Error::WrongRemovalBatchSize { batch: 1, got: 2, .. });

    manager
        .remove_disks("raid1pool", vec!["sde".into()])
        .await
        .unwrap();
    let pool = manager
        .remove_disks("raid1pool", vec!["sdd".into()])
        .await
        .unwrap();
    assert_eq!(pool.disks.len(), 2);
    assert_eq!(pool.usage.total, 100 * GB);

    let err = manager
        .remove_disks("raid1pool", vec!["sdc".into()])
        .await
        .unwrap_err();
    assert_matches!(err, Error::InsufficientDisksRemaining { remaining: 1, .. });
}

#[tokio::test]
async fn raid0_grows_into_raid10() {
    let disks: Vec<(&str, u64)> = ["sdb", "sdc", "sdd", "sde"]
        .iter()
        .map(|d| (*d, 100 * GB))
        .collect();
    let (manager, system) = manager_with(&disks);

    manager
        .create(request("grow", "raid0", &["sdb", "sdc"]))
        .await
        .unwrap();
    let pool = manager
        .add_disks(
            "grow",
            AddDisksRequest {
                disks: vec!["sdd".into(), "sde".into()],
                raid_level: Some("raid10".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(pool.raid_level, RaidLevel::Raid10);
    assert_eq!(pool.usage.total, 200 * GB);

    // Resizes wait for the conversion balance to finish
    manager.refresh_balance("grow").await.unwrap();
    assert_matches!(
        manager
            .remove_disks("grow", vec!["sdd".into(), "sde".into()])
            .await,
        Err(Error::BalanceInProgress { .. })
    );

    system.set_balance_state("grow", BalanceState::Finished);
    manager.refresh_balance("grow").await.unwrap();
    assert_matches!(
        manager
            .remove_disks("grow", vec!["sdd".into(), "sde".into()])
            .await,
        Err(Error::InsufficientDisksRemaining { .. })
    );
}

#[tokio::test]
async fn remount_composes_effective_options() {
    let (manager, system) = manager_with(&[("sdb", 100 * GB)]);

    let mut create = request("opts", "single", &["sdb"]);
    create.compression = Some("zlib".into());
    create.mount_options = Some("noatime,,commit=30".into());
    let pool = manager.create(create).await.unwrap();
    assert_eq!(pool.mount_options.to_string(), "noatime,commit=30");

    manager
        .remount(
            "opts",
            RemountRequest {
                compression: None,
                mount_options: Some("compress-force=lzo,ssd".into()),
            },
        )
        .await
        .unwrap();

    let options: Vec<String> = system
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            SystemCall::MountPool { options, .. } | SystemCall::RemountPool { options, .. } => {
                Some(options)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        options,
        vec!["noatime,commit=30,compress=zlib", "compress-force=lzo,ssd"]
    );
}

#[tokio::test]
async fn every_failure_is_classified() {
    let (manager, system) = manager_with(&[("sdb", 100 * GB), ("sdc", 100 * GB)]);

    let validation = manager
        .create(request("Pool $", "single", &["sdb"]))
        .await
        .unwrap_err();
    assert_eq!(validation.kind(), ErrorKind::Validation);

    let not_found = manager.delete("ghost").await.unwrap_err();
    assert_eq!(not_found.kind(), ErrorKind::NotFound);

    system.fail_next("mount_pool", "ERROR: mkfs.btrfs failed");
    let external = manager
        .create(request("p", "single", &["sdb"]))
        .await
        .unwrap_err();
    assert_eq!(external.kind(), ErrorKind::ExternalCommand);
    assert_eq!(external.to_string(), "ERROR: mkfs.btrfs failed");

    manager
        .create(request("p", "single", &["sdb"]))
        .await
        .unwrap();
    let conflict = manager
        .create(request("q", "single", &["sdb"]))
        .await
        .unwrap_err();
    assert_eq!(conflict.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn root_pool_from_inventory_file() {
    let file: InventoryFile = serde_yaml::from_str(
        r#"
disks:
  - name: sda
    size: 50000000000
  - name: sdb
    size: 100000000000
pools:
  - name: rockstor_rockstor
    raid_level: single
    is_root: true
    mount_point: /mnt2/rockstor_rockstor
    disks:
      - name: sda
        identifier: ata-QEMU_HARDDISK_QM00005
"#,
    )
    .unwrap();

    let system = Arc::new(InMemorySystem::new(&file.mount_root));
    let manager =
        PoolManager::new(ManagerConfig::default(), system.clone(), Arc::new(file.inventory()))
            .unwrap();
    for pool in file.pools.iter().cloned() {
        manager.register(pool).await.unwrap();
    }

    let err = manager
        .add_disks("rockstor_rockstor", add(&["sdb"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::RootPoolProtected { .. });
    assert!(system.calls().is_empty());

    let pools = manager.list().await.unwrap();
    assert_eq!(pools.len(), 1);
    assert!(pools[0].is_root);
}

#[tokio::test]
async fn racing_creates_leave_one_owner_per_disk() {
    let (manager, system) = manager_with(&[("sdb", 100 * GB)]);
    system.set_delay(std::time::Duration::from_millis(50));

    let (a, b) = tokio::join!(
        manager.create(request("pa", "single", &["sdb"])),
        manager.create(request("pb", "single", &["sdb"])),
    );
    assert!(a.is_err() || b.is_err(), "sdb owned by two pools");
    assert!(a.is_ok() || b.is_ok());

    let pools = manager.list().await.unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].disks[0].name, "sdb");
}
