//! Configuration management for lexis.
//!
//! Loads settings from $LEXIS_CONFIG, /etc/lexis/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/lexis/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/lexis/config.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "LEXIS_CONFIG";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7870".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/lexis/lexis.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Progress cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age of a cached aggregate before it is recomputed
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Entry count at which the oldest entry is evicted on insert
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_size() -> usize {
    1000
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_size: default_cache_max_size(),
        }
    }
}

/// Experience point rewards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpRewards {
    #[serde(default = "default_first_completion")]
    pub first_completion: i64,

    #[serde(default = "default_second_completion")]
    pub second_completion: i64,

    /// Trickle reward for the third and later completions of a lesson
    #[serde(default = "default_subsequent_completion")]
    pub subsequent_completion: i64,

    #[serde(default = "default_correct_answer")]
    pub correct_answer: i64,
}

fn default_first_completion() -> i64 {
    20
}

fn default_second_completion() -> i64 {
    10
}

fn default_subsequent_completion() -> i64 {
    5
}

fn default_correct_answer() -> i64 {
    5
}

impl XpRewards {
    /// Reward tier for a completion, given the attempts recorded before it
    pub fn for_completion(&self, attempts_before: i64) -> i64 {
        match attempts_before {
            i64::MIN..=0 => self.first_completion,
            1 => self.second_completion,
            _ => self.subsequent_completion,
        }
    }
}

impl Default for XpRewards {
    fn default() -> Self {
        Self {
            first_completion: default_first_completion(),
            second_completion: default_second_completion(),
            subsequent_completion: default_subsequent_completion(),
            correct_answer: default_correct_answer(),
        }
    }
}

/// Full lexis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexisConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub xp: XpRewards,
}

impl LexisConfig {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        let from_env = std::env::var(CONFIG_ENV)
            .ok()
            .map(|path| Self::load_from_path(&path));

        match from_env {
            Some(Ok(config)) => return config,
            Some(Err(e)) => warn!("Failed to load config from ${}: {}", CONFIG_ENV, e),
            None => {}
        }

        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                LexisConfig::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: LexisConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save default config to path (for init)
    #[allow(dead_code)]
    pub fn save_default(path: impl AsRef<Path>) -> Result<()> {
        let config = LexisConfig::default();
        let content = toml::to_string_pretty(&config)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}
