//! Shared test doubles for the provider, sink and keep-alive seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{KeepAliveError, LocationError, ProviderError};
use crate::keep_alive::KeepAlive;
use crate::position::Position;
use crate::provider::{
    LocationCallback, LocationProvider, LocationRequest, LocationResult, RawLocation,
    RegistrationId,
};
use crate::sink::DispatchSink;

/// Provider whose samples are pushed by the test.
#[derive(Default)]
pub struct ManualProvider {
    callbacks: Mutex<HashMap<RegistrationId, LocationCallback>>,
    next_id: AtomicU64,
    pub requests: Mutex<Vec<LocationRequest>>,
    pub request_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    /// Reject every registration while set.
    pub reject: AtomicBool,
}

impl ManualProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active_registrations(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Pushes a raw result to every registered callback.
    pub fn deliver(&self, sample: Result<LocationResult, ProviderError>) {
        let callbacks: Vec<LocationCallback> = self.callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            callback(sample.clone());
        }
    }

    pub fn push(&self, latitude: f64, longitude: f64) {
        self.deliver(Ok(LocationResult::single(RawLocation::from(Position::new(
            latitude, longitude,
        )))));
    }

    pub fn fail(&self, reason: &str) {
        self.deliver(Err(ProviderError::Sample(reason.to_string())));
    }
}

impl LocationProvider for ManualProvider {
    fn request_updates(
        &self,
        request: &LocationRequest,
        callback: LocationCallback,
    ) -> Result<RegistrationId, ProviderError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("test rejection".to_string()));
        }
        self.requests.lock().push(*request);
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks.lock().insert(id, callback);
        Ok(id)
    }

    fn remove_updates(&self, id: RegistrationId) -> Result<(), ProviderError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().remove(&id);
        Ok(())
    }
}

/// Sink that records every published position.
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<Position>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn positions(&self) -> Vec<Position> {
        self.published.lock().clone()
    }

    /// Waits until at least `count` positions were published.
    pub async fn wait_for(&self, count: usize) {
        wait_until(&self.notify, || self.published.lock().len() >= count).await;
    }
}

impl DispatchSink for RecordingSink {
    fn publish(&self, position: Position) {
        self.published.lock().push(position);
        self.notify.notify_waiters();
    }
}

/// Error callback that records what it was handed.
#[derive(Default)]
pub struct RecordingErrors {
    pub errors: Mutex<Vec<LocationError>>,
    notify: Notify,
}

impl RecordingErrors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn handler(self: &Arc<Self>) -> crate::pipeline::ErrorHandler {
        let this = Arc::clone(self);
        Arc::new(move |err: &LocationError| {
            this.errors.lock().push(err.clone());
            this.notify.notify_waiters();
        })
    }

    pub async fn wait_for(&self, count: usize) {
        wait_until(&self.notify, || self.errors.lock().len() >= count).await;
    }
}

/// Keep-alive that counts acquire/release calls.
#[derive(Default)]
pub struct CountingKeepAlive {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub refuse: AtomicBool,
}

impl CountingKeepAlive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn held(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

impl KeepAlive for CountingKeepAlive {
    fn acquire(&self, _id: u32) -> Result<(), KeepAliveError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(KeepAliveError::Refused("test refusal".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _id: u32) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Polls `done` after every notification, failing the test after one second.
async fn wait_until(notify: &Notify, done: impl Fn() -> bool) {
    let wait = async {
        loop {
            let notified = notify.notified();
            if done() {
                return;
            }
            notified.await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .expect("timed out waiting for condition");
}
