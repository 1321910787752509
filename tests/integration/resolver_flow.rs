use std::sync::Arc;

use simloc::error::CacheError;
use simloc::resolver::ResolveOptions;
use simloc::store::SearchQuery;
use simloc::types::{SearchField, LOCALHOST};
use tempfile::TempDir;

use crate::support::{
    local_store, record, remote_store, resolver, HostScript, ScriptedProbe, SIM_A, SIM_B, SIM_C,
};

#[tokio::test]
async fn local_hit_does_not_contact_hosts() {
    let probe = Arc::new(ScriptedProbe::new().host("alpha", HostScript::Fail));
    let resolver = resolver(
        local_store(&[record(SIM_A, "disk", "/data/disk")]),
        remote_store(&[]),
        &["alpha"],
        probe.clone(),
    );

    let hits = resolver
        .resolve(&SearchQuery::new(["disk"]), ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].host, LOCALHOST);
    assert_eq!(probe.searches(), 0);
    assert_eq!(resolver.stats().fanouts, 0);
}

#[tokio::test(start_paused = true)]
async fn global_search_survives_a_hanging_host() {
    let probe = Arc::new(
        ScriptedProbe::new()
            .host("alpha", HostScript::Answer(vec![record(SIM_A, "disk", "/a/disk")]))
            .host("beta", HostScript::Hang)
            .host(
                "gamma",
                HostScript::Answer(vec![
                    record(SIM_B, "disk-hires", "/g/disk"),
                    record(SIM_A, "disk", "/g/copy"),
                ]),
            ),
    );
    let remote = remote_store(&[]);
    let resolver = resolver(local_store(&[]), remote.clone(), &["alpha", "beta", "gamma"], probe.clone());

    let started = tokio::time::Instant::now();
    let options = ResolveOptions {
        force_global: true,
        ..ResolveOptions::default()
    };
    let hits = resolver
        .resolve(&SearchQuery::new(["disk"]), options)
        .await
        .unwrap();

    assert!(started.elapsed() >= std::time::Duration::from_secs(2));
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].uuid, SIM_A);
    assert_eq!(hits[0].host, "alpha");
    assert_eq!(hits[1].uuid, SIM_B);
    assert_eq!(hits[1].host, "gamma");
    assert_eq!(probe.searches(), 3);

    let stats = resolver.stats();
    assert_eq!(stats.probe_failures, 1);
    assert_eq!(stats.write_backs, 2);

    let remote = remote.read();
    assert_eq!(remote.len(), 2);
    assert_eq!(remote.request(SIM_A).unwrap().host, "alpha");
    assert_eq!(remote.request("7a1b2c3d").unwrap().host, "gamma");
}

#[tokio::test]
async fn fanout_results_are_served_from_remote_cache_afterwards() {
    let probe = Arc::new(
        ScriptedProbe::new()
            .host("alpha", HostScript::Answer(vec![record(SIM_A, "disk", "/a/disk")])),
    );
    let resolver = resolver(local_store(&[]), remote_store(&[]), &["alpha"], probe.clone());
    let query = SearchQuery::new(["disk"]);

    let first = resolver.resolve(&query, ResolveOptions::default()).await.unwrap();
    let second = resolver.resolve(&query, ResolveOptions::default()).await.unwrap();

    assert_eq!(first[0].uuid, second[0].uuid);
    assert_eq!(second[0].host, "alpha");
    assert_eq!(probe.searches(), 1);
    assert_eq!(resolver.stats().fanouts, 1);
}

#[tokio::test]
async fn validation_evicts_vanished_remote_records() {
    let probe = Arc::new(
        ScriptedProbe::new()
            .host("alpha", HostScript::Answer(Vec::new()))
            .existing("alpha", "/a/present"),
    );
    let remote = remote_store(&[
        record(SIM_A, "disk", "/a/gone").with_host("alpha"),
        record(SIM_B, "disk", "/a/present").with_host("alpha"),
    ]);
    let resolver = resolver(local_store(&[]), remote.clone(), &["alpha"], probe.clone());

    let options = ResolveOptions {
        validate_existence: true,
        ..ResolveOptions::default()
    };
    let hits = resolver
        .resolve(&SearchQuery::new(["disk"]), options)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, SIM_B);
    assert!(!remote.read().contains(SIM_A));
    assert!(remote.read().contains(SIM_B));
    assert_eq!(resolver.stats().evictions, 1);
    assert_eq!(probe.searches(), 0);
}

#[tokio::test]
async fn validation_keeps_existing_local_records() {
    let temp = TempDir::new().unwrap();
    let resolver = resolver(
        local_store(&[
            record(SIM_A, "disk", temp.path()),
            record(SIM_B, "disk", temp.path().join("missing")),
        ]),
        remote_store(&[]),
        &[],
        Arc::new(ScriptedProbe::new()),
    );

    let options = ResolveOptions {
        validate_existence: true,
        ..ResolveOptions::local_only()
    };
    let hits = resolver
        .resolve(&SearchQuery::new(["disk"]), options)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, SIM_A);
    assert!(!resolver.local_store().read().contains(SIM_B));
}

#[tokio::test]
async fn unique_query_with_several_matches_fails() {
    let resolver = resolver(
        local_store(&[
            record(SIM_A, "disk", "/data/disk"),
            record(SIM_B, "disk-hires", "/data/disk-hires"),
        ]),
        remote_store(&[]),
        &[],
        Arc::new(ScriptedProbe::new()),
    );

    let result = resolver
        .resolve(&SearchQuery::new(["disk"]).unique(true), ResolveOptions::default())
        .await;
    assert!(matches!(result, Err(CacheError::ResultNotUnique(2))));

    let hits = resolver
        .resolve(&SearchQuery::new(["hires"]).unique(true), ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(hits[0].uuid, SIM_B);
}

#[tokio::test]
async fn failing_hosts_end_in_not_found() {
    let probe = Arc::new(
        ScriptedProbe::new()
            .host("alpha", HostScript::Fail)
            .host("beta", HostScript::Fail),
    );
    let resolver = resolver(local_store(&[]), remote_store(&[]), &["alpha", "beta"], probe.clone());

    let result = resolver
        .resolve(&SearchQuery::new(["disk"]), ResolveOptions::default())
        .await;

    assert!(matches!(result, Err(CacheError::NoSimulationFound(_))));
    assert_eq!(probe.searches(), 2);
    assert_eq!(resolver.stats().probe_failures, 2);
}

#[tokio::test]
async fn refresh_and_exclusive_reach_the_probe_request() {
    let probe = Arc::new(
        ScriptedProbe::new()
            .host("alpha", HostScript::Answer(vec![record(SIM_C, "disk", "/a/disk")])),
    );
    let resolver = resolver(local_store(&[]), remote_store(&[]), &["alpha"], probe.clone());

    let options = ResolveOptions {
        refresh_remote: true,
        ..ResolveOptions::default()
    };
    resolver
        .resolve(&SearchQuery::new(["disk", "a"]).exclusive(true), options)
        .await
        .unwrap();

    let requests = probe.requests.lock();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].update);
    assert!(requests[0].exclusive);
    assert_eq!(requests[0].patterns, vec!["disk".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn remote_answers_are_narrowed_to_requested_fields() {
    let probe = Arc::new(ScriptedProbe::new().host(
        "alpha",
        HostScript::Answer(vec![
            record(SIM_A, "disk", "/a/disk"),
            record(SIM_B, "torus", "/a/torus").with_tags(["disk"]),
        ]),
    ));
    let resolver = resolver(local_store(&[]), remote_store(&[]), &["alpha"], probe);

    let hits = resolver
        .resolve(
            &SearchQuery::new(["disk"]).fields([SearchField::Name]),
            ResolveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, SIM_A);
}
