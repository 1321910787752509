use std::fs;
use std::path::Path;

use clap::Parser;
use simloc::config::SimlocConfig;
use simloc::error::{ApiError, CacheError};
use simloc::store::SimulationRecord;
use simloc::tooling::{Cli, CliContext};
use tempfile::TempDir;

use crate::support::{write_simulation, SIM_A, SIM_B};

fn context(temp: &TempDir) -> CliContext {
    let sims = temp.path().join("sims");
    write_simulation(&sims.join("disk"), SIM_A, "disk", &["hydro", "2d"]);
    write_simulation(&sims.join("torus").join("hires"), SIM_B, "torus", &["mhd", "3d"]);
    fs::create_dir_all(sims.join("scratch")).unwrap();

    let mut config = SimlocConfig::default();
    config.root_dirs = vec![sims];
    config.storage.data_dir = Some(temp.path().join("data"));
    CliContext::with_config(config)
}

fn run(ctx: &CliContext, args: &[&str]) -> Result<String, ApiError> {
    let cli = Cli::try_parse_from(std::iter::once("simloc").chain(args.iter().copied())).unwrap();
    ctx.execute(&cli.command)
}

#[test]
fn cache_json_output_is_the_probe_wire_format() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);

    let output = run(&ctx, &["cache", "--json", "--generate", "--", "^hydro$", "^mhd$"]).unwrap();
    let records: Vec<SimulationRecord> = serde_json::from_str(&output).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].uuid, SIM_A);
    assert_eq!(records[1].uuid, SIM_B);
    assert!(records[1].path.ends_with(Path::new("torus/hires")));
    assert!(records.iter().all(|r| r.is_local()));
}

#[test]
fn generated_cache_is_persisted_between_invocations() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);

    let summary = run(&ctx, &["cache", "-g"]).unwrap();
    assert!(summary.starts_with("Cache rebuilt: 2 simulations"));
    assert!(temp.path().join("data").join("local_simcache.json").exists());

    let listing = run(&ctx, &["cache", "-l", "--json"]).unwrap();
    let records: Vec<SimulationRecord> = serde_json::from_str(&listing).unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn exclusive_cache_search_needs_all_patterns() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    run(&ctx, &["cache", "-g"]).unwrap();

    let output = run(&ctx, &["cache", "--json", "-e", "--", "^hydro$", "^3d$"]).unwrap();
    assert_eq!(output, "[]");

    let output = run(&ctx, &["cache", "--json", "-e", "--", "^hydro$", "^2d$"]).unwrap();
    let records: Vec<SimulationRecord> = serde_json::from_str(&output).unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn unique_search_prints_the_requested_field() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    run(&ctx, &["cache", "-g"]).unwrap();

    let output = run(&ctx, &["search", "--local-only", "-u", "-p", "uuid", "^torus$"]).unwrap();
    assert_eq!(output, SIM_B);

    let result = run(&ctx, &["search", "--local-only", "-u", "d"]);
    assert!(matches!(
        result,
        Err(ApiError::Cache(CacheError::ResultNotUnique(2)))
    ));
}

#[test]
fn remove_by_short_id_drops_the_record() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    run(&ctx, &["cache", "-g"]).unwrap();

    let output = run(&ctx, &["cache", "-r", "0f8e5d2a"]).unwrap();
    assert_eq!(output, "Removed '0f8e5d2a' from 1 cache(s)");

    let result = run(&ctx, &["search", "--local-only", "^disk$"]);
    assert!(matches!(
        result,
        Err(ApiError::Cache(CacheError::NoSimulationFound(_)))
    ));
}

#[test]
fn info_reads_metadata_of_the_enclosing_simulation() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let nested = temp.path().join("sims").join("disk").join("output");
    fs::create_dir_all(&nested).unwrap();

    let output = run(&ctx, &["info", nested.to_str().unwrap(), "tags"]).unwrap();
    assert_eq!(output, "2d, hydro");
}
