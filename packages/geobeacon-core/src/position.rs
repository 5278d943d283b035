//! Geographic position values and the message relayed for each update.

use serde::{Deserialize, Serialize};

use crate::geocode::Place;
use crate::protocol_constants::LOCATION_UPDATE_ACTION;

/// A point on the globe as reported by the location provider.
///
/// Immutable once constructed; equality is by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl Position {
    /// Creates a position from decimal degrees.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns whether both coordinates are finite and inside WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Message relayed to listeners for every accepted update.
///
/// Carries at minimum the coordinates; `city` and `country` are filled in
/// when a reverse geocoder resolved the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMessage {
    /// Action name listeners filter on.
    pub action: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl LocationMessage {
    /// Builds a message for `position`, optionally enriched with a place.
    pub fn new(position: Position, place: Option<Place>) -> Self {
        let (city, country) = match place {
            Some(place) => (place.city, place.country),
            None => (None, None),
        };
        Self {
            action: LOCATION_UPDATE_ACTION.to_string(),
            latitude: position.latitude,
            longitude: position.longitude,
            city,
            country,
        }
    }

    /// Recovers the position carried by this message.
    ///
    /// Returns `None` for non-finite coordinates, which a well-behaved
    /// publisher never produces but a foreign sender might.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        let position = Position::new(self.latitude, self.longitude);
        position.is_valid().then_some(position)
    }
}
