//! Error types
//!
//! Storage failures are kept separate from lookup outcomes so callers can tell
//! "the cache file is broken" apart from "nothing matched".

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the persistence layer of a fingerprint store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Outcomes of a cache lookup or mutation that are not a success.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Nothing found for '{0}'")]
    CacheMiss(String),

    #[error("No result found for {0:?}")]
    NoSimulationFound(Vec<String>),

    #[error("Search result is not unique! {0} results found.")]
    ResultNotUnique(usize),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Short id '{short}' is ambiguous: {candidates:?}")]
    AmbiguousShortId {
        short: String,
        candidates: Vec<String>,
    },

    #[error("Not a simulation directory: {0}")]
    NotASimulation(PathBuf),

    #[error("Operation '{operation}' is not supported by the {tier} cache")]
    UnsupportedOnTier {
        operation: &'static str,
        tier: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CacheError {
    /// True for the "nothing there" family of outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CacheError::CacheMiss(_) | CacheError::NoSimulationFound(_)
        )
    }
}

/// Failures of a single host probe. Never fatal for a fan-out.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Host '{host}' did not answer within {timeout_secs}s")]
    Timeout { host: String, timeout_secs: u64 },

    #[error("Transport to '{host}' failed: {message}")]
    Transport { host: String, message: String },

    #[error("Command on '{host}' exited with {status}: {stderr}")]
    CommandFailed {
        host: String,
        status: i32,
        stderr: String,
    },

    #[error("Could not decode response from '{host}': {source}")]
    Decode {
        host: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors of the mount lifecycle.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("Mounting '{endpoint}' failed: {message}")]
    MountFailed { endpoint: String, message: String },

    #[error("Unmounting '{}' failed: {message}", .mount_dir.display())]
    UnmountFailed { mount_dir: PathBuf, message: String },

    #[error("I/O error on mount bookkeeping: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown mount client token: {0}")]
    UnknownToken(String),

    #[error("No simloc mount with index {index} ({available} available)")]
    IndexOutOfRange { index: usize, available: usize },
}

/// Top level error of the public API and the command line.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Async runtime error: {0}")]
    Runtime(String),

    #[error("Command '{command}' exited with status {status}")]
    CommandFailed { command: String, status: i32 },

    #[error("Use of restricted simloc ssh key with invalid command: {0}")]
    RestrictedCommand(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
