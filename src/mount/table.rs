//! Live system mount table.

use crate::error::MountError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One line of the mount listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// What is mounted, `host:/path` for sshfs
    pub source: String,
    /// Where it is mounted
    pub target: PathBuf,
    /// The raw listing line
    pub line: String,
}

impl MountEntry {
    /// Whether this is a simloc managed sshfs mount.
    pub fn is_simloc_sshfs(&self) -> bool {
        self.line.contains("sshfs") && self.line.contains(super::bookkeeping::DIR_PREFIX)
    }
}

/// Read access to the mounts currently active on this machine.
#[async_trait]
pub trait MountTable: Send + Sync {
    async fn entries(&self) -> Result<Vec<MountEntry>, MountError>;
}

/// Parse the output of `mount`: `<source> on <target> type ... (...)` on
/// Linux, `<source> on <target> (...)` on macOS.
pub fn parse_mount_output(output: &str) -> Vec<MountEntry> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 || fields[1] != "on" {
                return None;
            }
            Some(MountEntry {
                source: fields[0].to_string(),
                target: PathBuf::from(fields[2]),
                line: line.to_string(),
            })
        })
        .collect()
}

fn normalize_endpoint(endpoint: &str) -> &str {
    match endpoint.trim_end_matches('/') {
        "" => endpoint,
        trimmed if trimmed.ends_with(':') => endpoint,
        trimmed => trimmed,
    }
}

/// Find the simloc mount serving `endpoint`.
///
/// Lines are pre-filtered by substring, then the source must be the endpoint
/// itself so `host:/data/sim1` never reuses a mount of `host:/data/sim10`.
pub fn find_endpoint<'a>(entries: &'a [MountEntry], endpoint: &str) -> Option<&'a MountEntry> {
    let wanted = normalize_endpoint(endpoint);
    entries
        .iter()
        .filter(|entry| entry.line.contains(wanted))
        .find(|entry| normalize_endpoint(&entry.source) == wanted && is_bookkeeping_mount(&entry.target))
}

fn is_bookkeeping_mount(target: &Path) -> bool {
    target.file_name().map(|n| n == super::bookkeeping::MOUNT_DIR).unwrap_or(false)
        && target
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(super::bookkeeping::DIR_PREFIX))
            .unwrap_or(false)
}

/// Mount table read through the `mount` command.
#[derive(Debug, Default, Clone)]
pub struct SystemMountTable;

#[async_trait]
impl MountTable for SystemMountTable {
    async fn entries(&self) -> Result<Vec<MountEntry>, MountError> {
        let output = tokio::process::Command::new("mount")
            .stdin(std::process::Stdio::null())
            .output()
            .await?;
        Ok(parse_mount_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX: &str = "\
proc on /proc type proc (rw,nosuid,nodev,noexec,relatime)
hostA:/data/sim10 on /tmp/simloc-aaaa/mnt type fuse.sshfs (ro,nosuid,nodev,relatime)
hostA:/data/sim1 on /tmp/simloc-bbbb/mnt type fuse.sshfs (ro,nosuid,nodev,relatime)
hostA:/data/sim2 on /home/me/manual type fuse.sshfs (rw)
";

    #[test]
    fn test_parse_linux_output() {
        let entries = parse_mount_output(LINUX);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].source, "hostA:/data/sim10");
        assert_eq!(entries[1].target, PathBuf::from("/tmp/simloc-aaaa/mnt"));
        assert!(entries[1].is_simloc_sshfs());
        assert!(!entries[0].is_simloc_sshfs());
    }

    #[test]
    fn test_parse_macos_output() {
        let entries = parse_mount_output(
            "hostA:/data/sim1 on /private/tmp/simloc-cccc/mnt (macfuse, nodev, nosuid, read-only)",
        );
        assert_eq!(entries[0].target, PathBuf::from("/private/tmp/simloc-cccc/mnt"));
    }

    #[test]
    fn test_find_endpoint_is_exact() {
        let entries = parse_mount_output(LINUX);
        let found = find_endpoint(&entries, "hostA:/data/sim1").unwrap();
        assert_eq!(found.target, PathBuf::from("/tmp/simloc-bbbb/mnt"));
        assert_eq!(
            find_endpoint(&entries, "hostA:/data/sim1/").unwrap().target,
            PathBuf::from("/tmp/simloc-bbbb/mnt")
        );
        // mounted, but not by simloc
        assert!(find_endpoint(&entries, "hostA:/data/sim2").is_none());
        assert!(find_endpoint(&entries, "hostA:/data/sim3").is_none());
    }
}
