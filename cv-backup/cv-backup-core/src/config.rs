//! Settings for the client policy and the backup server.
//!
//! Values come from an optional JSON file, then from `CV_BACKUP_*`
//! environment variables, and finally from command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::local::DEFAULT_QUOTA;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding the local store, the handle registry and the
    /// sandbox (default `.cv-backup`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Byte quota of the local string store (default 5 MiB)
    #[serde(default = "default_quota")]
    pub local_quota: usize,

    /// Whether the private sandbox directory may be used (default true)
    #[serde(default = "default_true")]
    pub sandbox: bool,

    /// Preselected answer for the file picker
    #[serde(default)]
    pub file_target: Option<PathBuf>,

    /// Ask on the terminal when a file has to be picked (default false)
    #[serde(default)]
    pub interactive: bool,

    /// Base URL of the backup server (default http://127.0.0.1:3000)
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    /// Named slot on the server; the legacy slot when unset
    #[serde(default)]
    pub remote_slot: Option<String>,

    /// Development context: only then is the backup server probed
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_data_dir() -> PathBuf { PathBuf::from(".cv-backup") }
fn default_quota() -> usize { DEFAULT_QUOTA }
fn default_true() -> bool { true }
fn default_remote_url() -> String { "http://127.0.0.1:3000".to_string() }

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            local_quota: default_quota(),
            sandbox: true,
            file_target: None,
            interactive: false,
            remote_url: default_remote_url(),
            remote_slot: None,
            dev_mode: false,
        }
    }
}

impl BackupConfig {
    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir.join("local-storage.json")
    }

    pub fn handles_path(&self) -> PathBuf {
        self.data_dir.join("handles.json")
    }

    pub fn sandbox_path(&self) -> Option<PathBuf> {
        self.sandbox.then(|| self.data_dir.join("sandbox"))
    }

    /// Override fields from the environment.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("CV_BACKUP_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(quota) = std::env::var("CV_BACKUP_QUOTA") {
            self.local_quota = quota
                .parse()
                .with_context(|| format!("invalid CV_BACKUP_QUOTA `{quota}`"))?;
        }
        if let Ok(file) = std::env::var("CV_BACKUP_FILE") {
            self.file_target = Some(PathBuf::from(file));
        }
        if let Ok(url) = std::env::var("CV_BACKUP_REMOTE_URL") {
            self.remote_url = url;
        }
        if let Ok(slot) = std::env::var("CV_BACKUP_REMOTE_SLOT") {
            self.remote_slot = Some(slot).filter(|s| !s.is_empty());
        }
        if let Ok(dev) = std::env::var("CV_BACKUP_DEV") {
            self.dev_mode = env_flag(&dev);
        }
        if let Ok(sandbox) = std::env::var("CV_BACKUP_SANDBOX") {
            self.sandbox = env_flag(&sandbox);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default 127.0.0.1:3000)
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Directory of named backup files (default public/backups)
    #[serde(default = "default_backups_dir")]
    pub backups_dir: PathBuf,

    /// Location of the unnamed legacy backup (default public/cv-backup.json)
    #[serde(default = "default_legacy_file")]
    pub legacy_file: PathBuf,
}

fn default_addr() -> String { "127.0.0.1:3000".to_string() }
fn default_backups_dir() -> PathBuf { PathBuf::from("public/backups") }
fn default_legacy_file() -> PathBuf { PathBuf::from("public/cv-backup.json") }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            backups_dir: default_backups_dir(),
            legacy_file: default_legacy_file(),
        }
    }
}

impl ServerConfig {
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("CV_BACKUP_ADDR") {
            self.addr = addr;
        }
        if let Ok(dir) = std::env::var("CV_BACKUP_BACKUPS_DIR") {
            self.backups_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("CV_BACKUP_LEGACY_FILE") {
            self.legacy_file = PathBuf::from(file);
        }
    }
}

/// Both sections of a config file; either may be left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: BackupConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Read `path` if given, defaults otherwise, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.client.apply_env()?;
        config.server.apply_env();
        Ok(config)
    }
}

fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
