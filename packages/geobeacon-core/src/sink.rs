//! Dispatch sink abstraction for decoupling the pipeline from publication.
//!
//! The pipeline hands every accepted [`Position`] to a [`DispatchSink`] and
//! never looks back: publishing is fire-and-forget, and a failing sink is the
//! sink's own concern.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::geocode::{Geocoder, NoopGeocoder};
use crate::position::{LocationMessage, Position};

/// Publishes location updates to the outside world.
///
/// Called from the update-forwarding task with the stream's delivery gate
/// held, so implementations must not block for long and must not cancel the
/// subscription that is delivering to them.
pub trait DispatchSink: Send + Sync {
    fn publish(&self, position: Position);
}

/// Sink that discards every update.
pub struct NoopSink;

impl DispatchSink for NoopSink {
    fn publish(&self, _position: Position) {}
}

/// Logs every update at debug level.
pub struct LoggingSink;

impl DispatchSink for LoggingSink {
    fn publish(&self, position: Position) {
        tracing::debug!(
            latitude = position.latitude,
            longitude = position.longitude,
            "location_update"
        );
    }
}

/// Relays updates as [`LocationMessage`]s on a broadcast channel.
///
/// Each update is enriched with the geocoder's place names before sending.
/// Listeners subscribe with [`BroadcastSink::subscribe`]; a listener that
/// falls behind receives `Lagged` and skips ahead.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LocationMessage>,
    geocoder: Arc<dyn Geocoder>,
}

impl BroadcastSink {
    /// Creates a sink with the given channel capacity and no geocoder.
    pub fn new(capacity: usize) -> Self {
        Self::with_geocoder(capacity, Arc::new(NoopGeocoder))
    }

    pub fn with_geocoder(capacity: usize, geocoder: Arc<dyn Geocoder>) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, geocoder }
    }

    /// Returns a new receiver for relayed messages.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationMessage> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl DispatchSink for BroadcastSink {
    fn publish(&self, position: Position) {
        let place = self.geocoder.reverse(position);
        let message = LocationMessage::new(position, place);
        if let Err(e) = self.tx.send(message) {
            log::trace!("[BroadcastSink] No listeners: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::{KnownPlace, PlaceTable};
    use crate::protocol_constants::LOCATION_UPDATE_ACTION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl DispatchSink for CountingSink {
        fn publish(&self, _position: Position) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sinks_are_usable_as_trait_objects() {
        let counting = Arc::new(CountingSink(AtomicUsize::new(0)));
        let sinks: Vec<Arc<dyn DispatchSink>> = vec![
            Arc::new(NoopSink),
            Arc::new(LoggingSink),
            counting.clone(),
        ];

        for sink in &sinks {
            sink.publish(Position::new(1.0, 2.0));
        }

        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_sink_relays_message_with_place() {
        let table = PlaceTable::new(vec![KnownPlace {
            city: "Milan".to_string(),
            country: "Italy".to_string(),
            latitude: 45.4642,
            longitude: 9.19,
            radius_km: 10.0,
        }]);
        let sink = BroadcastSink::with_geocoder(8, Arc::new(table));
        let mut rx = sink.subscribe();

        sink.publish(Position::new(45.47, 9.2));
        sink.publish(Position::new(0.0, 0.0));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.action, LOCATION_UPDATE_ACTION);
        assert_eq!(first.city.as_deref(), Some("Milan"));
        assert_eq!(first.position(), Some(Position::new(45.47, 9.2)));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.city, None);
        assert_eq!(second.country, None);
    }

    #[test]
    fn broadcast_without_listeners_does_not_fail() {
        let sink = BroadcastSink::new(4);
        assert_eq!(sink.listener_count(), 0);
        sink.publish(Position::new(1.0, 1.0));
    }
}
