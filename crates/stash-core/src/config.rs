//! Configuration system for Stash.
//!
//! Resolution order: environment variables → config file → defaults.
//! Positional command-line arguments are applied on top by the binaries.
//!
//! Config file location:
//!   1. $STASH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/stash/config.toml
//!   3. ~/.config/stash/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_INDEX_PORT, DEFAULT_MAX_ADVERTS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    pub index: IndexConfig,
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// UDP port the index listens on, all interfaces.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Index host, dotted-decimal.
    pub index_host: String,
    pub index_port: u16,
    /// Address advertised to the index. Empty = auto-detect.
    pub advertise_ip: String,
    /// Directory advertised files are served from.
    pub serve_dir: PathBuf,
    /// Directory fetched files are written to.
    pub download_dir: PathBuf,
    /// Prefix prepended to the content tag when saving a fetched file.
    pub download_prefix: String,
    /// Maximum number of content items served at once.
    pub max_adverts: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_INDEX_PORT,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            index_host: "127.0.0.1".to_string(),
            index_port: DEFAULT_INDEX_PORT,
            advertise_ip: String::new(),
            serve_dir: PathBuf::from("."),
            download_dir: PathBuf::from("."),
            download_prefix: "recv_".to_string(),
            max_adverts: DEFAULT_MAX_ADVERTS,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("stash")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl StashConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            StashConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("STASH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&StashConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply STASH_* overrides. `lookup` is `std::env::var` outside of tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(p) = lookup("STASH_INDEX__PORT").and_then(|v| v.parse().ok()) {
            self.index.port = p;
        }
        if let Some(v) = lookup("STASH_PEER__INDEX_HOST") {
            self.peer.index_host = v;
        }
        if let Some(p) = lookup("STASH_PEER__INDEX_PORT").and_then(|v| v.parse().ok()) {
            self.peer.index_port = p;
        }
        if let Some(v) = lookup("STASH_PEER__ADVERTISE_IP") {
            self.peer.advertise_ip = v;
        }
        if let Some(v) = lookup("STASH_PEER__SERVE_DIR") {
            self.peer.serve_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STASH_PEER__DOWNLOAD_DIR") {
            self.peer.download_dir = PathBuf::from(v);
        }
    }
}
