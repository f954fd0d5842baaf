#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_ENV: &str = "MODULE_PACKER_CONFIG";

/// Process-wide configuration, built once at start-up and passed down by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackerConfig {
    pub defaults: MetadataDefaults,
    pub discovery: DiscoveryConfig,
}

/// Values the metadata record starts from before any user input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataDefaults {
    pub architecture: i64,
    pub author: String,
    pub email: String,
    pub description: String,
    pub homepage: String,
    pub license: String,
    pub extra_files: String,
    pub command_line_args: String,
    pub min_redis_version: String,
    pub min_rlec_version: String,
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        Self {
            architecture: 64,
            author: String::new(),
            email: String::new(),
            description: String::new(),
            homepage: "http://redismodules.com".to_string(),
            license: "AGPL".to_string(),
            extra_files: String::new(),
            command_line_args: String::new(),
            min_redis_version: "4.0".to_string(),
            min_rlec_version: "4.2".to_string(),
        }
    }
}

/// Settings for the `redis-server` host used to enumerate module commands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub redis_server: PathBuf,
    pub host: String,
    pub startup_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            redis_server: PathBuf::from("redis-server"),
            host: "127.0.0.1".to_string(),
            startup_timeout_ms: 5_000,
            io_timeout_ms: 5_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl PackerConfig {
    /// Loads the configuration named by `MODULE_PACKER_CONFIG`, or the built-in
    /// defaults when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("{} is not a valid packer config", path.display()))
    }

    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}
