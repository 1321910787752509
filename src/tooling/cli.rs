//! CLI Tooling
//!
//! Command-line interface for locating, caching and mounting simulations.

use super::format::{self, ListEntry};
use crate::config::{ConfigLoader, SimlocConfig};
use crate::error::{ApiError, CacheError, StorageError};
use crate::extract::{MetaDirExtractor, RecordExtractor};
use crate::logging::LoggingConfig;
use crate::mount::{MountLease, MountManager};
use crate::remote::{shell_split, SshProbe, StaticHosts};
use crate::resolver::{ResolveOptions, Resolver};
use crate::store::{open_backend, FingerprintStore, SearchQuery, SimulationRecord};
use crate::types::SearchField;
use clap::{Args, Parser, Subcommand};
use parking_lot::RwLock;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// simloc - find simulations on any host, then work on them locally
#[derive(Parser)]
#[command(name = "simloc")]
#[command(about = "Locate, cache and mount simulation directories across hosts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global configuration)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (debug level to stderr)
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Apply the logging flags on top of the configured logging.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if self.verbose {
            config.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search local and remote caches, then all hosts
    Search(SearchArgs),
    /// Maintain the local cache; with --json also the remote search endpoint
    Cache(CacheArgs),
    /// Show the metadata of the simulation containing a directory
    Info {
        /// Directory to start from [default: current directory]
        path: Option<PathBuf>,
        /// Single property to show
        #[arg(value_enum)]
        field: Option<SearchField>,
    },
    /// List a directory, showing simulation names instead of directory names
    Ls {
        /// Directory to list [default: current directory]
        directory: Option<PathBuf>,
        /// Print full directory names
        #[arg(short = 'f')]
        full_names: bool,
        /// Print tags at the end of each line
        #[arg(short = 't', long)]
        tags: bool,
    },
    /// Manage sshfs mounts of remote simulations
    Mount {
        #[command(subcommand)]
        command: MountCommands,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
pub struct SearchArgs {
    /// What to search for (regular expressions)
    #[arg(required = true)]
    pub patterns: Vec<String>,

    /// Fail unless exactly one simulation matches
    #[arg(short = 'u', long)]
    pub unique: bool,

    /// All given patterns must match
    #[arg(short = 'e', long = "exclusive-search")]
    pub exclusive: bool,

    /// Force searching all known hosts
    #[arg(short = 'g', long = "global")]
    pub global: bool,

    /// Only search the cache of this host
    #[arg(long, conflicts_with = "global")]
    pub local_only: bool,

    /// Drop (and evict) results that no longer exist
    #[arg(long)]
    pub validate: bool,

    /// Ask remote hosts to rebuild their cache before answering
    #[arg(long)]
    pub refresh: bool,

    /// Properties to search [default: all]
    #[arg(long, value_enum, num_args = 1..)]
    pub search_fields: Vec<SearchField>,

    /// Output as JSON
    #[arg(long, conflicts_with = "print")]
    pub json: bool,

    /// Print only this property, one line per result
    #[arg(short = 'p', long, value_enum)]
    pub print: Option<SearchField>,
}

impl SearchArgs {
    fn query(&self) -> SearchQuery {
        let fields = if self.search_fields.is_empty() {
            SearchField::ALL.to_vec()
        } else {
            self.search_fields.clone()
        };
        SearchQuery::new(self.patterns.clone())
            .fields(fields)
            .unique(self.unique)
            .exclusive(self.exclusive)
    }

    fn options(&self) -> ResolveOptions {
        ResolveOptions {
            search_remote: !self.local_only,
            force_global: self.global,
            validate_existence: self.validate,
            refresh_remote: self.refresh,
        }
    }
}

#[derive(Args, Default)]
pub struct CacheArgs {
    /// Search patterns, or paths with --notify
    pub patterns: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Force (re)generation of the cache
    #[arg(short = 'g', long)]
    pub generate: bool,

    /// Remove non existing simulations from the cache
    #[arg(short = 's', long)]
    pub scrub: bool,

    /// Notify the cache about a simulation
    #[arg(short = 'n', long)]
    pub notify: bool,

    /// List all cached items
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Remove simulation with given id from both caches
    #[arg(short = 'r', long)]
    pub remove: Option<String>,

    /// All given patterns must match
    #[arg(short = 'e', long = "exclusive-search")]
    pub exclusive: bool,
}

#[derive(Subcommand)]
pub enum MountCommands {
    /// List simloc sshfs mounts of this machine
    List,
    /// Unmount the mount with the given list index
    Unmount { index: usize },
    /// Unmount and mount again the mount with the given list index
    Remount { index: usize },
    /// Mount a simulation and run a command inside it
    Exec {
        /// Patterns identifying exactly one simulation
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Force searching all known hosts
        #[arg(short = 'g', long = "global")]
        global: bool,

        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

/// CLI context holding the effective configuration
pub struct CliContext {
    config: SimlocConfig,
}

impl CliContext {
    /// Load the configuration, from `config_path` layered over the global
    /// file when given.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = ConfigLoader::load(config_path.as_deref())?;
        Ok(Self { config })
    }

    pub fn with_config(config: SimlocConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimlocConfig {
        &self.config
    }

    fn open_local(&self) -> Result<FingerprintStore, ApiError> {
        let (path, _) = self.config.storage.resolve_paths()?;
        let backend = open_backend(self.config.storage.backend, &path)?;
        Ok(FingerprintStore::open_local(
            backend,
            Arc::new(MetaDirExtractor::new()),
            self.config.root_dirs.clone(),
        )?)
    }

    fn open_remote(&self) -> Result<FingerprintStore, ApiError> {
        let (_, path) = self.config.storage.resolve_paths()?;
        let backend = open_backend(self.config.storage.backend, &path)?;
        Ok(FingerprintStore::open_remote(backend)?)
    }

    fn resolver(&self) -> Result<Resolver, ApiError> {
        Ok(Resolver::new(
            Arc::new(RwLock::new(self.open_local()?)),
            Arc::new(RwLock::new(self.open_remote()?)),
            Arc::new(StaticHosts::new(self.config.hosts.clone())),
            Arc::new(SshProbe::new(self.config.ssh.clone())),
            self.config.search.clone(),
        ))
    }

    fn block_on<T, F>(&self, future: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ApiError::Runtime(
                "Cannot start a command from within an async runtime".to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ApiError::Runtime(format!("Failed to create runtime: {}", e)))?;
        runtime.block_on(future)
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Search(args) => self.handle_search(args),
            Commands::Cache(args) => self.handle_cache(args),
            Commands::Info { path, field } => self.handle_info(path.as_deref(), *field),
            Commands::Ls {
                directory,
                full_names,
                tags,
            } => self.handle_ls(directory.as_deref(), *full_names, *tags),
            Commands::Mount { command } => self.handle_mount_command(command),
            Commands::Config {
                command: ConfigCommands::Show,
            } => self.config.to_toml(),
        }
    }

    fn handle_search(&self, args: &SearchArgs) -> Result<String, ApiError> {
        let resolver = self.resolver()?;
        let query = args.query();
        let records = self.block_on(async {
            Ok::<_, ApiError>(resolver.resolve(&query, args.options()).await?)
        })?;
        let stats = resolver.stats();
        tracing::debug!(
            fanouts = stats.fanouts,
            probes = stats.probes,
            failures = stats.probe_failures,
            evictions = stats.evictions,
            "Search finished"
        );
        render_records(&records, args.json, args.print)
    }

    fn handle_cache(&self, args: &CacheArgs) -> Result<String, ApiError> {
        let mut local = self.open_local()?;

        if args.notify {
            let targets = if args.patterns.is_empty() {
                vec![std::env::current_dir().map_err(StorageError::from)?]
            } else {
                args.patterns.iter().map(PathBuf::from).collect()
            };
            let mut added = Vec::new();
            for target in &targets {
                added.push(local.notify(target)?);
            }
            return Ok(added.join("\n"));
        }

        if args.scrub {
            let removed = local.scrub()?;
            return Ok(format!("Removed {} vanished simulations from the cache", removed));
        }

        if let Some(key) = &args.remove {
            let mut remote = self.open_remote()?;
            let mut removed = 0;
            for store in [&mut local, &mut remote] {
                match store.remove(key) {
                    Ok(Some(_)) => removed += 1,
                    Ok(None) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(format!("Removed '{}' from {} cache(s)", key, removed));
        }

        let mut summary = None;
        if args.generate {
            summary = Some(format::rebuild_summary(&local.rebuild(None)?));
        }

        if args.list {
            let remote = self.open_remote()?;
            let records: Vec<SimulationRecord> =
                local.records().chain(remote.records()).cloned().collect();
            return render_records(&records, args.json, None);
        }

        if !args.patterns.is_empty() {
            let query = SearchQuery::new(args.patterns.clone()).exclusive(args.exclusive);
            let hits = local.search_lenient(&query)?;
            return render_records(&hits, args.json, None);
        }

        Ok(summary.unwrap_or_default())
    }

    fn handle_info(&self, path: Option<&Path>, field: Option<SearchField>) -> Result<String, ApiError> {
        let start = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir().map_err(StorageError::from)?,
        };
        let record = MetaDirExtractor::new()
            .locate(&start)
            .map_err(StorageError::from)?
            .ok_or(CacheError::NotASimulation(start))?;
        Ok(match field {
            Some(field) => record.field_display(field),
            None => format::record_info(&record),
        })
    }

    fn handle_ls(&self, directory: Option<&Path>, full_names: bool, tags: bool) -> Result<String, ApiError> {
        let dir = match directory {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(StorageError::from)?,
        };
        let extractor = MetaDirExtractor::new();
        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::from(std::io::Error::from(e)))?;
            let file = entry.file_name().to_string_lossy().into_owned();
            if file.starts_with('.') {
                continue;
            }
            let record = if entry.file_type().is_dir() {
                extractor.extract(entry.path()).unwrap_or_else(|e| {
                    warn!(path = %entry.path().display(), error = %e, "Failed to read simulation metadata");
                    None
                })
            } else {
                None
            };
            entries.push(match record {
                Some(record) => ListEntry {
                    name: record.name.clone(),
                    tags: record.joined_tags(),
                    file,
                },
                None => ListEntry {
                    name: file.clone(),
                    tags: String::new(),
                    file,
                },
            });
        }
        Ok(format::directory_listing(&entries, full_names, tags))
    }

    fn handle_mount_command(&self, command: &MountCommands) -> Result<String, ApiError> {
        let manager = MountManager::sshfs(self.config.mount.clone());
        match command {
            MountCommands::List => {
                let entries = self.block_on(async {
                    Ok::<_, ApiError>(manager.list_mounts().await?)
                })?;
                Ok(format::mounts_table(&entries))
            }
            MountCommands::Unmount { index } => {
                let entry = self.block_on(async {
                    Ok::<_, ApiError>(manager.unmount_index(*index).await?)
                })?;
                Ok(format!("Unmounted {} from {}", entry.source, entry.target.display()))
            }
            MountCommands::Remount { index } => {
                let entry = self.block_on(async {
                    Ok::<_, ApiError>(manager.remount_index(*index).await?)
                })?;
                Ok(format!("Remounted {} on {}", entry.source, entry.target.display()))
            }
            MountCommands::Exec {
                patterns,
                global,
                command,
            } => self.block_on(self.mount_exec(&manager, patterns, *global, command)),
        }
    }

    /// Resolve one simulation, mount it, run `command` inside, then stay
    /// around as supervisor until the mount has been released.
    async fn mount_exec(
        &self,
        manager: &MountManager,
        patterns: &[String],
        global: bool,
        command: &[String],
    ) -> Result<String, ApiError> {
        let resolver = self.resolver()?;
        let query = SearchQuery::new(patterns.to_vec()).unique(true);
        let options = ResolveOptions {
            force_global: global,
            ..ResolveOptions::default()
        };
        let record = resolver
            .resolve(&query, options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CacheError::NoSimulationFound(patterns.to_vec()))?;

        let lease = manager.acquire(&record.location()).await?;
        let outcome = tokio::select! {
            status = run_in(&lease, command) => Some(status),
            _ = interrupted() => None,
        };
        drop(lease);
        let Some(outcome) = outcome else {
            warn!("Interrupted, releasing mount");
            manager.shutdown().await;
            return Err(ApiError::Runtime("Interrupted".to_string()));
        };

        info!(
            grace_period_secs = manager.config().grace_period_secs,
            "Waiting for the mount to become unused"
        );
        tokio::select! {
            _ = manager.wait_idle() => {}
            _ = interrupted() => manager.shutdown().await,
        }
        outcome
    }
}

/// Flag making the binary run the command of `SSH_ORIGINAL_COMMAND`.
pub const SSH_ORIGINAL_COMMAND_FLAG: &str = "--use-ssh-original-command";

/// Subcommands reachable through a restricted ssh key.
const REMOTE_SUBCOMMANDS: [&str; 3] = ["cache", "info", "ls"];

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run simloc with these arguments
    Args(Vec<String>),
    /// `test -e <path>`, answered by the exit status
    PathExists(PathBuf),
}

/// Resolve the process arguments.
///
/// With `--use-ssh-original-command` as first argument the binary serves as
/// forced command of a restricted ssh key: `original` must be a simloc
/// read command or the `test -e` existence check, everything else is refused.
pub fn resolve_invocation(args: Vec<String>, original: Option<&str>) -> Result<Invocation, ApiError> {
    if args.get(1).map(String::as_str) != Some(SSH_ORIGINAL_COMMAND_FLAG) {
        return Ok(Invocation::Args(args));
    }
    let original = original
        .ok_or_else(|| ApiError::RestrictedCommand("SSH_ORIGINAL_COMMAND is not set".to_string()))?;
    let words = shell_split(original).map_err(ApiError::RestrictedCommand)?;
    let refuse = || Err(ApiError::RestrictedCommand(original.to_string()));

    let Some((program, rest)) = words.split_first() else {
        return refuse();
    };
    if program == "test" {
        return match rest {
            [flag, path] if flag == "-e" => Ok(Invocation::PathExists(PathBuf::from(path))),
            _ => refuse(),
        };
    }
    if !program.contains("simloc") {
        return refuse();
    }
    match rest.first() {
        Some(subcommand) if REMOTE_SUBCOMMANDS.contains(&subcommand.as_str()) => {
            let binary = args.first().cloned().unwrap_or_else(|| "simloc".to_string());
            Ok(Invocation::Args(std::iter::once(binary).chain(rest.iter().cloned()).collect()))
        }
        _ => refuse(),
    }
}

fn render_records(
    records: &[SimulationRecord],
    json: bool,
    print: Option<SearchField>,
) -> Result<String, ApiError> {
    if json {
        return format::records_json(records);
    }
    Ok(match print {
        Some(field) => format::field_lines(records, field),
        None => format::records_table(records),
    })
}

async fn run_in(lease: &MountLease, command: &[String]) -> Result<String, ApiError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(String::new());
    };
    let status = tokio::process::Command::new(program)
        .args(args)
        .current_dir(lease.path())
        .env("SIMLOC_PATH", lease.path())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(StorageError::from)?;
    if status.success() {
        Ok(String::new())
    } else {
        Err(ApiError::CommandFailed {
            command: command.join(" "),
            status: status.code().unwrap_or(-1),
        })
    }
}

/// Resolves on Ctrl-C, and on SIGTERM where there is one.
async fn interrupted() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
