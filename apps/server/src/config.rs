//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use geobeacon_core::{
    KnownPlace, PermissionScope, PositioningBackends, ReplayConfig,
    protocol_constants::DEFAULT_BROADCAST_CAPACITY, service::NOTIFICATION_ID,
};
use serde::Deserialize;

/// How relayed location messages are written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One JSON object per line on stdout.
    #[default]
    Json,
    /// Info-level log records only.
    Log,
}

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Location permission scope requested by the service.
    pub permission_scope: PermissionScope,

    /// Whether location permission is granted on this host.
    /// Override: `GEOBEACON_PERMISSION_GRANTED`
    pub permission_granted: bool,

    /// Whether satellite positioning is enabled.
    /// Override: `GEOBEACON_SATELLITE_ENABLED`
    pub satellite_enabled: bool,

    /// Whether network positioning is enabled.
    /// Override: `GEOBEACON_NETWORK_ENABLED`
    pub network_enabled: bool,

    /// Route replayed as the positioning source.
    /// Startup fails when it lists no waypoints.
    pub replay: ReplayConfig,

    /// Capacity of the relay channel.
    /// Override: `GEOBEACON_BROADCAST_CAPACITY`
    pub broadcast_capacity: usize,

    /// Places used to annotate messages with city and country.
    pub places: Vec<KnownPlace>,

    /// Keep-alive slot id.
    pub notification_id: u32,

    /// Output format for relayed messages.
    pub output: OutputMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            permission_scope: PermissionScope::Fine,
            permission_granted: true,
            satellite_enabled: true,
            network_enabled: true,
            replay: ReplayConfig::default(),
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            places: Vec::new(),
            notification_id: NOTIFICATION_ID,
            output: OutputMode::Json,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies overrides looked up by environment variable name.
    ///
    /// Unparseable values are ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "GEOBEACON_PERMISSION_GRANTED", &mut self.permission_granted);
        override_from(&lookup, "GEOBEACON_SATELLITE_ENABLED", &mut self.satellite_enabled);
        override_from(&lookup, "GEOBEACON_NETWORK_ENABLED", &mut self.network_enabled);
        override_from(&lookup, "GEOBEACON_BROADCAST_CAPACITY", &mut self.broadcast_capacity);

        // Note: GEOBEACON_REPLAY_INTERVAL_MS and GEOBEACON_OUTPUT are handled
        // by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to geobeacon-core's Config type.
    pub fn to_core_config(&self) -> geobeacon_core::Config {
        geobeacon_core::Config {
            permission_scope: self.permission_scope,
            permission_granted: self.permission_granted,
            positioning: PositioningBackends {
                satellite: self.satellite_enabled,
                network: self.network_enabled,
            },
            replay: self.replay.clone(),
            broadcast_capacity: self.broadcast_capacity,
            places: self.places.clone(),
            notification_id: self.notification_id,
        }
    }
}

fn override_from<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => log::warn!("Ignoring {}={:?}: not a valid value", key, raw),
    }
}
