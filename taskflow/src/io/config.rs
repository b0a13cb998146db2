//! Server configuration stored as `taskflow.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Upper bound for `job_lease_secs` (one week).
pub const MAX_JOB_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

/// Server configuration (TOML).
///
/// Meant to be edited by hand. Missing fields fall back to the defaults
/// below, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,

    /// SQLite file; parent directories are created on open.
    pub database_path: PathBuf,

    /// Idle interval between `: heartbeat` comments on the event stream.
    pub heartbeat_interval_secs: u64,

    /// Per-subscriber notification queue depth. A subscriber whose queue is
    /// full when a notification is published gets dropped.
    pub subscriber_buffer: usize,

    /// How long a polled job stays leased to its runner.
    pub job_lease_secs: u64,

    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    /// First path segment of generated branch names.
    pub branch_prefix: String,
    pub remote: String,
    /// Prepended to the task title to form SUBMIT commit messages.
    pub commit_message_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "taskflow".to_string(),
            remote: "origin".to_string(),
            commit_message_prefix: "taskflow: ".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            database_path: PathBuf::from("data/taskflow.db"),
            heartbeat_interval_secs: 15,
            subscriber_buffer: 64,
            job_lease_secs: 600,
            git: GitConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port must be > 0"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(anyhow!("heartbeat_interval_secs must be > 0"));
        }
        if self.subscriber_buffer == 0 {
            return Err(anyhow!("subscriber_buffer must be > 0"));
        }
        if self.job_lease_secs == 0 {
            return Err(anyhow!("job_lease_secs must be > 0"));
        }
        if self.job_lease_secs > MAX_JOB_LEASE_SECS {
            return Err(anyhow!("job_lease_secs must be <= {MAX_JOB_LEASE_SECS}"));
        }
        if self.git.branch_prefix.trim().is_empty() {
            return Err(anyhow!("git.branch_prefix must be non-empty"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must be non-empty"));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn job_lease(&self) -> Duration {
        Duration::from_secs(self.job_lease_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ServerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        let cfg = ServerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ServerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conf").join("taskflow.toml");
        let mut cfg = ServerConfig::default();
        cfg.port = 8080;
        cfg.git.branch_prefix = "bot".to_string();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taskflow.toml");
        fs::write(&path, "port = 4000\n[git]\nremote = \"upstream\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.git.remote, "upstream");
        assert_eq!(cfg.git.branch_prefix, "taskflow");
        assert_eq!(cfg.subscriber_buffer, 64);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taskflow.toml");
        fs::write(&path, "subscriber_buffer = 0\n").expect("write");
        let err = load_config(&path).expect_err("zero buffer");
        assert!(format!("{err:#}").contains("subscriber_buffer must be > 0"));

        let mut cfg = ServerConfig::default();
        cfg.git.remote = " ".to_string();
        assert!(write_config(&path, &cfg).is_err());
    }
}
