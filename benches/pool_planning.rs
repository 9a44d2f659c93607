//! Benchmark for request validation
//!
//! Covers the mount-option grammar, the capacity bound and create/add
//! planning against a populated manager.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use storage_pool_manager::{
    usable_capacity, AddDisksRequest, CreatePoolRequest, InMemorySystem, ManagerConfig,
    MountOptions, PoolManager, RaidLevel, StaticInventory,
};

fn bench_mount_options(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount_options");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse_all_options", |b| {
        let input = "fatal_errors,thread_pool=1,max_inline=2,ssd_spread,clear_cache,inode_cache,\
                     nodatacow,noatime,nodatasum,alloc_start=3,noacl,space_cache,ssd,discard,\
                     commit=4,autodefrag,metadata_ratio=5,nospace_cache,compress-force=zlib";
        b.iter(|| MountOptions::parse(black_box(input)));
    });

    group.bench_function("parse_rejects", |b| {
        b.iter(|| MountOptions::parse(black_box("noatime,alloc_start=derp")));
    });

    group.finish();
}

fn bench_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");

    let sizes: Vec<u64> = (1..=24).map(|i| i * 250_000_000_000).collect();
    for level in [RaidLevel::Raid1, RaidLevel::Raid10, RaidLevel::Raid6] {
        group.bench_function(format!("usable_capacity_{}", level), |b| {
            b.iter(|| usable_capacity(level, black_box(&sizes)));
        });
    }

    group.finish();
}

fn bench_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("planning");
    group.throughput(Throughput::Elements(1));

    let disks: Vec<String> = (0..512).map(|i| format!("disk{:03}", i)).collect();
    let system = Arc::new(InMemorySystem::new("/mnt2"));
    let inventory = Arc::new(StaticInventory::from_names(disks.clone()));
    let manager = PoolManager::new(ManagerConfig::default(), system, inventory)
        .expect("manager");

    // 100 raid1 pools of 4 disks each
    tokio_test::block_on(async {
        for (i, chunk) in disks.chunks(4).take(100).enumerate() {
            manager
                .create(CreatePoolRequest {
                    name: format!("pool{:03}", i),
                    raid_level: "raid1".into(),
                    disks: chunk.to_vec(),
                    ..Default::default()
                })
                .await
                .expect("create");
        }
    });

    let create = CreatePoolRequest {
        name: "fresh".into(),
        raid_level: "raid10".into(),
        disks: disks[400..404].to_vec(),
        compression: Some("lzo".into()),
        mount_options: Some("noatime,commit=30".into()),
    };
    group.bench_function("plan_create", |b| {
        b.iter(|| tokio_test::block_on(manager.plan_create(black_box(&create))));
    });

    let add = AddDisksRequest {
        disks: disks[404..406].to_vec(),
        raid_level: Some("raid10".into()),
    };
    group.bench_function("plan_add_with_conversion", |b| {
        b.iter(|| tokio_test::block_on(manager.plan_add(black_box("pool050"), black_box(&add))));
    });

    group.finish();
}

criterion_group!(benches, bench_mount_options, bench_capacity, bench_planning);
criterion_main!(benches);
