// Stage configuration.
//
// Same layering as the relay (defaults, then TOML file, then
// `SOUNDSTAGE_STAGE_*` environment, then CLI flags in `main.rs`), and the
// same file helpers from `soundstage_relay::config`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use soundstage_relay::config::{discover_config_file, load_toml};
use soundstage_relay::{ConfigError, ReconnectPolicy, TransportConfig};

use crate::effects::Viewport;
use crate::host::HostSettings;
use crate::silent::DEFAULT_SILENT_DURATION_MS;
use crate::timer::Millis;

pub const LOCAL_CONFIG_FILE: &str = "soundstage-stage.toml";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: f32,
    pub height: f32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        let vp = Viewport::default();
        Self {
            width: vp.width,
            height: vp.height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// `host:port` of the relay.
    pub relay_addr: String,
    pub device_name: String,
    /// Mode loaded at startup, before the relay says otherwise.
    pub initial_story_mode: String,
    /// Ask the relay for its story mode after every (re)connect.
    pub request_state_on_connect: bool,
    /// TOML catalog replacing the built-in one.
    pub catalog_file: Option<PathBuf>,
    pub master_volume: f32,
    pub default_effect_ms: Millis,
    /// Nominal clip length for the headless backend.
    pub silent_clip_ms: Millis,
    pub frame_interval_ms: Millis,
    pub effect_seed: u64,
    pub viewport: ViewportConfig,
    pub reconnect: ReconnectPolicy,
    pub log_level: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        let host = HostSettings::default();
        Self {
            relay_addr: "127.0.0.1:7878".into(),
            device_name: "stage-host".into(),
            initial_story_mode: "classic".into(),
            request_state_on_connect: false,
            catalog_file: None,
            master_volume: host.master_volume,
            default_effect_ms: host.default_effect_ms,
            silent_clip_ms: DEFAULT_SILENT_DURATION_MS,
            frame_interval_ms: 16,
            effect_seed: host.effect_seed,
            viewport: ViewportConfig::default(),
            reconnect: ReconnectPolicy::default(),
            log_level: "info".into(),
        }
    }
}

impl StageConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match discover_config_file(config_path, LOCAL_CONFIG_FILE) {
            Some(path) => load_toml(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SOUNDSTAGE_STAGE_RELAY") {
            self.relay_addr = addr;
        }
        if let Some(name) = lookup("SOUNDSTAGE_STAGE_NAME") {
            self.device_name = name;
        }
        if let Some(mode) = lookup("SOUNDSTAGE_STAGE_MODE") {
            self.initial_story_mode = mode;
        }
        if let Some(volume) = lookup("SOUNDSTAGE_STAGE_VOLUME") {
            self.master_volume = volume.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "SOUNDSTAGE_STAGE_VOLUME".into(),
                value: volume.clone(),
            })?;
        }
        if let Some(level) = lookup("SOUNDSTAGE_STAGE_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            default_effect_ms: self.default_effect_ms,
            master_volume: self.master_volume,
            viewport: Viewport::new(self.viewport.width, self.viewport.height),
            effect_seed: self.effect_seed,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        let mut transport = TransportConfig::new(self.relay_addr.clone(), self.device_name.clone());
        transport.reconnect = self.reconnect.clone();
        transport.request_state_on_connect = self.request_state_on_connect;
        transport
    }
}
