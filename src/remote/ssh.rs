//! ssh transport for host probes.
//!
//! The remote side runs the `simloc` binary itself (`cache --json ...`), so a
//! restricted ssh key whose forced command is
//! `simloc --use-ssh-original-command` is sufficient.

use super::{HostProbe, ProbeAction, ProbeRequest};
use crate::error::ProbeError;
use crate::store::SimulationRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::debug;

fn default_program() -> String {
    "ssh".to_string()
}

fn default_remote_command() -> String {
    "$HOME/.local/bin/simloc".to_string()
}

fn default_true() -> bool {
    true
}

fn default_multiplex_timeout() -> String {
    "24h".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// ssh transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// ssh client executable
    #[serde(default = "default_program")]
    pub program: String,

    /// simloc executable on the remote hosts
    #[serde(default = "default_remote_command")]
    pub remote_command: String,

    /// Directory holding per-host keys (`id_rsa_simloc_<host>`) and control sockets
    #[serde(default)]
    pub key_dir: Option<PathBuf>,

    /// Reuse connections through an ssh control master
    #[serde(default = "default_true")]
    pub multiplex: bool,

    /// ControlPersist value of the control master
    #[serde(default = "default_multiplex_timeout")]
    pub multiplex_timeout: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            remote_command: default_remote_command(),
            key_dir: None,
            multiplex: default_true(),
            multiplex_timeout: default_multiplex_timeout(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Quote a word for the remote POSIX shell.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Split a command line into words, undoing `shell_quote`.
///
/// Understands single quotes, double quotes and backslash escapes. Nothing is
/// expanded.
pub fn shell_split(line: &str) -> Result<Vec<String>, String> {
    let unterminated = || format!("Unterminated quote in '{}'", line);
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unterminated()),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Probe that reaches hosts by running commands over ssh.
#[derive(Debug, Clone)]
pub struct SshProbe {
    config: SshConfig,
}

impl SshProbe {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Private key dedicated to `host`, if one was provisioned.
    pub fn key_path(&self, host: &str) -> Option<PathBuf> {
        let key = self
            .config
            .key_dir
            .as_ref()?
            .join(format!("id_rsa_simloc_{}", host));
        key.exists().then_some(key)
    }

    /// Full ssh argument list for running `remote` on `host`.
    pub fn ssh_args(&self, host: &str, remote: &[String]) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
        ];
        if let Some(key) = self.key_path(host) {
            args.extend([
                "-i".to_string(),
                key.to_string_lossy().into_owned(),
                "-o".to_string(),
                "IdentitiesOnly=yes".to_string(),
            ]);
        }
        if self.config.multiplex {
            if let Some(dir) = &self.config.key_dir {
                args.extend([
                    "-o".to_string(),
                    "ControlMaster=auto".to_string(),
                    "-o".to_string(),
                    format!("ControlPersist={}", self.config.multiplex_timeout),
                    "-o".to_string(),
                    format!("ControlPath={}", dir.join("%C").display()),
                ]);
            }
        }
        args.push(host.to_string());
        args.extend(remote.iter().cloned());
        args
    }

    /// Remote command line for a request, already shell quoted.
    pub fn remote_args(&self, request: &ProbeRequest) -> Vec<String> {
        match request.action {
            ProbeAction::Search => {
                let mut args = vec![
                    self.config.remote_command.clone(),
                    "cache".to_string(),
                    "--json".to_string(),
                ];
                if request.update {
                    args.push("--generate".to_string());
                }
                if request.exclusive {
                    args.push("-e".to_string());
                }
                args.push("--".to_string());
                args.extend(request.patterns.iter().map(|p| shell_quote(p)));
                args
            }
            ProbeAction::Verify => {
                let mut args = vec!["test".to_string(), "-e".to_string()];
                args.extend(request.patterns.iter().map(|p| shell_quote(p)));
                args
            }
        }
    }

    async fn run(&self, host: &str, remote: &[String]) -> Result<std::process::Output, ProbeError> {
        let program = which::which(&self.config.program).map_err(|e| ProbeError::Transport {
            host: host.to_string(),
            message: format!("{} not found: {}", self.config.program, e),
        })?;
        let args = self.ssh_args(host, remote);
        debug!(host, args = ?args, "Running remote command");

        tokio::process::Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProbeError::Transport {
                host: host.to_string(),
                message: e.to_string(),
            })
    }
}

/// Decode a search response body.
pub(crate) fn decode_records(host: &str, stdout: &[u8]) -> Result<Vec<SimulationRecord>, ProbeError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(stdout).map_err(|source| ProbeError::Decode {
        host: host.to_string(),
        source,
    })
}

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[async_trait]
impl HostProbe for SshProbe {
    async fn search(
        &self,
        host: &str,
        request: &ProbeRequest,
    ) -> Result<Vec<SimulationRecord>, ProbeError> {
        let output = self.run(host, &self.remote_args(request)).await?;
        if !output.status.success() {
            return Err(ProbeError::CommandFailed {
                host: host.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        decode_records(host, &output.stdout)
    }

    async fn exists(&self, host: &str, path: &Path) -> Result<bool, ProbeError> {
        let request = ProbeRequest::verify(path);
        let output = self.run(host, &self.remote_args(&request)).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            Some(SSH_CONNECTION_FAILURE) => Err(ProbeError::Transport {
                host: host.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            code => Err(ProbeError::CommandFailed {
                host: host.to_string(),
                status: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("disk"), "disk");
        assert_eq!(shell_quote("/data/sim1"), "/data/sim1");
        assert_eq!(shell_quote("^disk.*$"), "'^disk.*$'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_split_undoes_quoting() {
        let words = ["disk", "a b", "it's", "", "^disk.*$"];
        let line = words.iter().map(|w| shell_quote(w)).collect::<Vec<_>>().join(" ");
        assert_eq!(shell_split(&line).unwrap(), words);

        assert_eq!(
            shell_split(r#"  cache "x \"y\"" a\ b "#).unwrap(),
            vec!["cache", r#"x "y""#, "a b"]
        );
        assert!(shell_split("cache 'open").is_err());
    }

    #[test]
    fn test_search_remote_args() {
        let probe = SshProbe::new(SshConfig::default());
        let request = ProbeRequest::search(vec!["disk".to_string(), "a b".to_string()], true)
            .with_update(true);
        assert_eq!(
            probe.remote_args(&request),
            vec![
                "$HOME/.local/bin/simloc",
                "cache",
                "--json",
                "--generate",
                "-e",
                "--",
                "disk",
                "'a b'"
            ]
        );
    }

    #[test]
    fn test_ssh_args_with_key_and_multiplex() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("id_rsa_simloc_cluster"), "key").unwrap();
        let probe = SshProbe::new(SshConfig {
            key_dir: Some(temp.path().to_path_buf()),
            ..SshConfig::default()
        });

        let args = probe.ssh_args("cluster", &["true".to_string()]);
        assert!(args.contains(&"IdentitiesOnly=yes".to_string()));
        assert!(args.contains(&"ControlMaster=auto".to_string()));
        assert_eq!(args[args.len() - 2], "cluster");
        assert_eq!(args[args.len() - 1], "true");

        let args = probe.ssh_args("other", &[]);
        assert!(!args.contains(&"IdentitiesOnly=yes".to_string()));
    }

    #[test]
    fn test_decode_records() {
        assert!(decode_records("h", b"  \n").unwrap().is_empty());
        let body = br#"[{"uuid": "0f8e5d2a-3c4b-4a1e-9b7d-2e6f1a0c9d88", "name": "disk", "tags": ["a"], "simcode": null, "path": "/d", "host": "localhost"}]"#;
        let records = decode_records("h", body).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            decode_records("h", b"not json"),
            Err(ProbeError::Decode { .. })
        ));
    }
}
