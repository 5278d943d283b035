//! Contract for the external push-based location provider.
//!
//! The provider is opaque: it accepts one callback per registration and
//! pushes [`LocationResult`] batches (or failures) into it from whatever
//! thread it likes until the registration is removed.

mod replay;

pub use replay::{ReplayConfig, ReplayProvider};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::position::Position;

/// Accuracy/power trade-off requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    /// Most precise fix available, typically satellite.
    #[default]
    HighAccuracy,
    /// Block-level accuracy.
    Balanced,
    /// City-level accuracy.
    LowPower,
    /// Only piggy-back on fixes requested by others.
    Passive,
}

/// Parameters of one update registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub priority: Priority,
    /// Desired interval between updates.
    pub interval: Duration,
    /// Fastest interval the consumer can handle.
    pub fastest_interval: Duration,
    /// Maximum batching delay; zero disables batching.
    pub max_wait: Duration,
}

impl LocationRequest {
    /// Real-time profile: highest accuracy, no minimum interval, no batching.
    pub const fn high_accuracy() -> Self {
        Self {
            priority: Priority::HighAccuracy,
            interval: Duration::ZERO,
            fastest_interval: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self::high_accuracy()
    }
}

/// One raw fix as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres, when known.
    pub accuracy_m: Option<f32>,
}

impl RawLocation {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

impl From<Position> for RawLocation {
    fn from(position: Position) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy_m: None,
        }
    }
}

/// A batch of fixes delivered in one callback, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationResult {
    pub locations: Vec<RawLocation>,
}

impl LocationResult {
    pub fn single(location: RawLocation) -> Self {
        Self {
            locations: vec![location],
        }
    }

    /// The most recent fix in the batch, if any.
    pub fn last_location(&self) -> Option<&RawLocation> {
        self.locations.last()
    }
}

/// Callback the provider pushes samples into.
pub type LocationCallback = Arc<dyn Fn(Result<LocationResult, ProviderError>) + Send + Sync>;

/// Identifies one registration with the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

/// Push-based location source.
///
/// Implementations must tolerate `remove_updates` being called from a
/// different thread than the one delivering callbacks.
pub trait LocationProvider: Send + Sync {
    /// Registers `callback` for updates matching `request`.
    ///
    /// Registration completes before this returns. The provider may invoke
    /// the callback before returning.
    fn request_updates(
        &self,
        request: &LocationRequest,
        callback: LocationCallback,
    ) -> Result<RegistrationId, ProviderError>;

    /// Removes a registration. Unknown ids are ignored.
    fn remove_updates(&self, id: RegistrationId) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_accuracy_profile_disables_interval_and_batching() {
        let request = LocationRequest::high_accuracy();
        assert_eq!(request.priority, Priority::HighAccuracy);
        assert_eq!(request.interval, Duration::ZERO);
        assert_eq!(request.fastest_interval, Duration::ZERO);
        assert_eq!(request.max_wait, Duration::ZERO);
        assert_eq!(LocationRequest::default(), request);
    }

    #[test]
    fn last_location_is_newest_fix() {
        let result = LocationResult {
            locations: vec![
                RawLocation::from(Position::new(1.0, 1.0)),
                RawLocation::from(Position::new(2.0, 2.0)),
            ],
        };
        assert_eq!(
            result.last_location().map(RawLocation::position),
            Some(Position::new(2.0, 2.0))
        );
        assert!(LocationResult::default().last_location().is_none());
    }
}
