//! Core configuration.
//!
//! [`Config`] carries everything the composition root needs to wire a
//! service. Hosts fill it from their own configuration sources.

use serde::{Deserialize, Serialize};

use crate::checker::{PermissionScope, PositioningBackends};
use crate::geocode::KnownPlace;
use crate::protocol_constants::DEFAULT_BROADCAST_CAPACITY;
use crate::provider::ReplayConfig;
use crate::service::NOTIFICATION_ID;

/// Configuration for a GeoBeacon host.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Preconditions
    /// Scope the service asks to be granted.
    pub permission_scope: PermissionScope,

    /// Whether the host has granted location permission.
    pub permission_granted: bool,

    /// Which positioning backends the host reports as enabled.
    pub positioning: PositioningBackends,

    // Source
    /// Route pushed by the replay provider.
    pub replay: ReplayConfig,

    // Dispatch
    /// Capacity of the broadcast channel relaying location messages.
    pub broadcast_capacity: usize,

    /// Places used to annotate messages with city and country.
    pub places: Vec<KnownPlace>,

    // Service
    /// Keep-alive slot held while running.
    pub notification_id: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            permission_scope: PermissionScope::Fine,
            permission_granted: true,
            positioning: PositioningBackends {
                satellite: true,
                network: true,
            },
            replay: ReplayConfig::default(),
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            places: Vec::new(),
            notification_id: NOTIFICATION_ID,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    ///
    /// Missing permission or disabled positioning are not configuration
    /// errors; they surface when the service starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.broadcast_capacity == 0 {
            return Err(
                "broadcast_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        self.replay
            .validate()
            .map_err(|e| format!("replay: {}", e))?;

        for place in &self.places {
            if !(place.radius_km.is_finite() && place.radius_km > 0.0) {
                return Err(format!("place {}: radius_km must be > 0", place.city));
            }
            if !place.position().is_valid() {
                return Err(format!("place {}: coordinates out of range", place.city));
            }
        }
        Ok(())
    }
}
