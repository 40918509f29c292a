// Relay configuration.
//
// Layering (later wins):
// 1. Compiled defaults (`RelayConfig::default()`).
// 2. A TOML file: the `--config` path if given, otherwise
//    `./soundstage-relay.toml` when it exists.
// 3. Environment variables (`SOUNDSTAGE_RELAY_*`).
// 4. Command-line flags, applied by `main.rs`.
//
// `load_toml` is shared with the stage crate so both binaries read files the
// same way and report the same errors.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File picked up from the working directory when no `--config` is given.
pub const LOCAL_CONFIG_FILE: &str = "soundstage-relay.toml";

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface to bind; `0.0.0.0` exposes the relay to the local network.
    pub bind_address: String,
    /// Listen port. 0 lets the OS pick one (used by tests).
    pub port: u16,
    /// Story mode the hub starts with, before anyone changes it.
    pub default_story_mode: Option<String>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 7878,
            default_story_mode: Some("classic".into()),
            log_level: "info".into(),
        }
    }
}

impl RelayConfig {
    /// Load defaults, then the config file, then environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match discover_config_file(config_path, LOCAL_CONFIG_FILE) {
            Some(path) => load_toml(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `SOUNDSTAGE_RELAY_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("SOUNDSTAGE_RELAY_BIND") {
            self.bind_address = bind;
        }
        if let Some(port) = lookup("SOUNDSTAGE_RELAY_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SOUNDSTAGE_RELAY_PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(mode) = lookup("SOUNDSTAGE_RELAY_DEFAULT_MODE") {
            self.default_story_mode = (!mode.is_empty()).then_some(mode);
        }
        if let Some(level) = lookup("SOUNDSTAGE_RELAY_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    /// The `host:port` string passed to `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Pick the explicit path if given, otherwise `local_name` in the working
/// directory when present.
pub fn discover_config_file(explicit: Option<&Path>, local_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(local_name);
    local.is_file().then_some(local)
}

/// Read and deserialize a TOML file. Missing keys fall back to the type's
/// `#[serde(default)]` values.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
