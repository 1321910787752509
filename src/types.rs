//! Core types shared by the stores, the resolver and the mount manager.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Host name used for records living on this machine.
pub const LOCALHOST: &str = "localhost";

/// Identity of a simulation: a hyphenated UUID string.
pub type SimId = String;

/// Check whether `key` is a well formed identity.
pub fn is_valid_identity(key: &str) -> bool {
    uuid::Uuid::parse_str(key).is_ok()
}

/// Leading segment of an identity, before the first `-`.
pub fn short_identity(identity: &str) -> &str {
    identity.split('-').next().unwrap_or(identity)
}

/// Generate a fresh identity.
pub fn new_identity() -> SimId {
    uuid::Uuid::new_v4().to_string()
}

/// Record attributes a search pattern can be evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Uuid,
    Name,
    Tags,
    Simcode,
    Path,
    Host,
}

impl SearchField {
    pub const ALL: [SearchField; 6] = [
        SearchField::Uuid,
        SearchField::Name,
        SearchField::Tags,
        SearchField::Simcode,
        SearchField::Path,
        SearchField::Host,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Uuid => "uuid",
            SearchField::Name => "name",
            SearchField::Tags => "tags",
            SearchField::Simcode => "simcode",
            SearchField::Path => "path",
            SearchField::Host => "host",
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a simulation lives: a host and a host-relative path.
///
/// Formats in scp syntax (`host:/path`), the local form is just the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub host: String,
    pub path: PathBuf,
}

impl Location {
    pub fn new(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(LOCALHOST, path)
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCALHOST
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "{}", self.path.display())
        } else {
            write!(f, "{}:{}", self.host, self.path.display())
        }
    }
}

impl FromStr for Location {
    type Err = std::convert::Infallible;

    /// Parse `host:/path` or a bare path. A colon that is part of the path
    /// (no host before it, or a `/` before the colon) keeps the value local.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((host, path)) if !host.is_empty() && !host.contains('/') => {
                Ok(Location::new(host, path))
            }
            _ => Ok(Location::local(s)),
        }
    }
}
