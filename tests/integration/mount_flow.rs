use std::sync::Arc;
use std::time::Duration;

use simloc::mount::{MountConfig, MountManager, MountState};
use simloc::resolver::ResolveOptions;
use simloc::store::SearchQuery;
use tempfile::TempDir;

use crate::support::{
    local_store, record, remote_store, resolver, CountingFs, EmptyTable, HostScript,
    ScriptedProbe, SIM_A,
};

#[tokio::test(start_paused = true)]
async fn resolved_remote_simulation_is_mounted_while_leased() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::new().host(
        "alpha",
        HostScript::Answer(vec![record(SIM_A, "disk", "/nonexistent/alpha/disk")]),
    ));
    let resolver = resolver(local_store(&[]), remote_store(&[]), &["alpha"], probe);
    let hits = resolver
        .resolve(&SearchQuery::new(["disk"]).unique(true), ResolveOptions::default())
        .await
        .unwrap();
    let location = hits[0].location();
    let endpoint = location.to_string();
    assert_eq!(endpoint, "alpha:/nonexistent/alpha/disk");

    let fs = Arc::new(CountingFs::default());
    let config = MountConfig {
        mount_root: Some(temp.path().to_path_buf()),
        grace_period_secs: 30,
        poll_interval_secs: 5,
        ..MountConfig::default()
    };
    let manager = MountManager::new(config, fs.clone(), Arc::new(EmptyTable));

    let first = manager.acquire(&location).await.unwrap();
    let second = manager.acquire(&location).await.unwrap();
    assert!(first.is_mounted());
    assert_eq!(first.path(), second.path());
    assert!(first.path().starts_with(temp.path()));
    assert_eq!(fs.mounts.lock().as_slice(), &[endpoint.clone()]);
    assert_eq!(manager.client_count(&endpoint), 2);

    drop(first);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.state(&endpoint), MountState::Mounted);
    assert!(fs.unmounts.lock().is_empty());

    let mount_point = second.path().to_path_buf();
    drop(second);
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(manager.state(&endpoint), MountState::Unmounted);
    assert_eq!(fs.unmounts.lock().as_slice(), &[mount_point]);
    assert!(manager.endpoints().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_idle_mounts_of_the_process() {
    let temp = TempDir::new().unwrap();
    let fs = Arc::new(CountingFs::default());
    let config = MountConfig {
        mount_root: Some(temp.path().to_path_buf()),
        ..MountConfig::default()
    };
    let manager = MountManager::new(config, fs.clone(), Arc::new(EmptyTable));

    let lease = manager.acquire_endpoint("alpha:/data/disk").await.unwrap();
    drop(lease);
    manager.shutdown().await;
    manager.wait_idle().await;

    assert_eq!(fs.unmounts.lock().len(), 1);
    assert_eq!(manager.state("alpha:/data/disk"), MountState::Unmounted);
}
