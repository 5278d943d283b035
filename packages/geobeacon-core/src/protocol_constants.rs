//! Fixed constants shared between the core and its hosts.
//!
//! Listeners match on these values, so changing them breaks every consumer
//! of the relayed messages.

// ─────────────────────────────────────────────────────────────────────────────
// Relayed Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Action name stamped on every [`LocationMessage`](crate::LocationMessage).
pub const LOCATION_UPDATE_ACTION: &str = "net.geobeacon.LOCATION_UPDATE";

/// Default capacity of the broadcast channel behind
/// [`BroadcastSink`](crate::sink::BroadcastSink).
///
/// Updates are small and arrive at most a few times per second; a slow
/// listener that falls this far behind receives `Lagged` and resumes.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Update Stream
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of undelivered provider failures held for a slow consumer.
///
/// Positions never queue (only the latest is kept). Failures are kept in
/// order up to this bound; beyond it the oldest are coalesced into a single
/// `Lagged` report.
pub const MAX_PENDING_FAILURES: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Geodesy
// ─────────────────────────────────────────────────────────────────────────────

/// Mean Earth radius (km) used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;
