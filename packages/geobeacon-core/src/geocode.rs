//! Reverse geocoding collaborator.
//!
//! The pipeline itself never geocodes. Sinks that relay updates may enrich
//! them with place names through a [`Geocoder`], called synchronously once per
//! update.

use serde::{Deserialize, Serialize};

use crate::position::Position;
use crate::protocol_constants::EARTH_RADIUS_KM;

/// Human-readable place a position falls in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Resolves coordinates to a [`Place`].
pub trait Geocoder: Send + Sync {
    /// Returns the place containing `position`, or `None` when unknown.
    fn reverse(&self, position: Position) -> Option<Place>;
}

/// Geocoder that never resolves anything.
pub struct NoopGeocoder;

impl Geocoder for NoopGeocoder {
    fn reverse(&self, _position: Position) -> Option<Place> {
        None
    }
}

/// A named place with a circular catchment area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownPlace {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Catchment radius in kilometres.
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
}

fn default_radius_km() -> f64 {
    25.0
}

impl KnownPlace {
    /// Centre of the catchment area.
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

/// Offline geocoder over a fixed table of places.
///
/// Picks the nearest place whose catchment contains the position.
#[derive(Debug, Clone, Default)]
pub struct PlaceTable {
    places: Vec<KnownPlace>,
}

impl PlaceTable {
    pub fn new(places: Vec<KnownPlace>) -> Self {
        Self { places }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.places.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

impl Geocoder for PlaceTable {
    fn reverse(&self, position: Position) -> Option<Place> {
        self.places
            .iter()
            .map(|place| (place, haversine_km(position, place.position())))
            .filter(|(place, distance)| *distance <= place.radius_km)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(place, _)| Place {
                city: Some(place.city.clone()),
                country: Some(place.country.clone()),
            })
    }
}

/// Great-circle distance between two positions in kilometres.
pub fn haversine_km(a: Position, b: Position) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}
