//! Remote filesystem driver.

use crate::error::MountError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::debug;

/// Mounts remote endpoints onto local directories.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Mount `endpoint` (`host:/path`) onto the existing directory `target`.
    async fn mount(&self, endpoint: &str, target: &Path) -> Result<(), MountError>;

    /// Unmount whatever is mounted on `target`.
    async fn unmount(&self, target: &Path) -> Result<(), MountError>;
}

/// sshfs based driver.
#[derive(Debug, Clone)]
pub struct Sshfs {
    cache_timeout_secs: u64,
    read_only: bool,
}

impl Sshfs {
    pub fn new(cache_timeout_secs: u64, read_only: bool) -> Self {
        Self {
            cache_timeout_secs,
            read_only,
        }
    }

    /// `-o` option list passed to sshfs.
    pub fn mount_options(&self) -> String {
        let mut options = Vec::new();
        if self.read_only {
            options.push("ro".to_string());
        }
        options.extend(["kernel_cache".to_string(), "cache=yes".to_string()]);
        for key in [
            "cache_timeout",
            "cache_stat_timeout",
            "cache_dir_timeout",
            "cache_link_timeout",
            "entry_timeout",
            "attr_timeout",
            "ac_attr_timeout",
        ] {
            options.push(format!("{}={}", key, self.cache_timeout_secs));
        }
        options.join(",")
    }

    /// Unmount command for this platform.
    fn unmount_command(target: &Path) -> Result<(std::path::PathBuf, Vec<String>), MountError> {
        let target = target.to_string_lossy().into_owned();
        if cfg!(target_os = "macos") {
            let program = which::which("umount").map_err(|e| MountError::UnmountFailed {
                mount_dir: target.clone().into(),
                message: e.to_string(),
            })?;
            return Ok((program, vec!["-f".to_string(), target]));
        }
        let program = which::which("fusermount")
            .or_else(|_| which::which("fusermount3"))
            .map_err(|e| MountError::UnmountFailed {
                mount_dir: target.clone().into(),
                message: format!("fusermount not found: {}", e),
            })?;
        Ok((program, vec!["-u".to_string(), target]))
    }
}

async fn run(program: &Path, args: &[String]) -> std::io::Result<std::process::Output> {
    debug!(program = %program.display(), args = ?args, "Running mount helper");
    tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
}

#[async_trait]
impl RemoteFs for Sshfs {
    async fn mount(&self, endpoint: &str, target: &Path) -> Result<(), MountError> {
        let failed = |message: String| MountError::MountFailed {
            endpoint: endpoint.to_string(),
            message,
        };
        let program = which::which("sshfs").map_err(|e| failed(format!("sshfs not found: {}", e)))?;
        let args = vec![
            endpoint.to_string(),
            target.to_string_lossy().into_owned(),
            "-o".to_string(),
            self.mount_options(),
        ];
        let output = run(&program, &args).await.map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let (program, args) = Self::unmount_command(target)?;
        let failed = |message: String| MountError::UnmountFailed {
            mount_dir: target.to_path_buf(),
            message,
        };
        let output = run(&program, &args).await.map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(())
    }
}
