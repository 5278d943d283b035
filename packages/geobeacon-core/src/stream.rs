//! Adapter from the callback-driven provider to a cancellable update stream.
//!
//! [`LocationStream::subscribe`] registers one callback with the provider and
//! hands back a [`StreamHandle`] plus a [`PositionStream`]. The callback writes
//! into a single-slot state holder that the stream drains:
//!
//! - Positions are state, not events: a newer fix replaces an undelivered one,
//!   unless a failure arrived in between.
//! - Provider failures are kept in arrival order (bounded by
//!   [`MAX_PENDING_FAILURES`]) so that none is lost without being reported.
//!
//! At most one subscription is live per adapter. Subscribing again cancels the
//! previous subscription first.
//!
//! # Cancellation
//!
//! Cancelling (explicitly, or by dropping either the handle or the stream)
//! closes the delivery gate, clears undelivered items and deregisters from the
//! provider. The gate is the same lock a consumer holds while handing an item
//! downstream (see [`PositionStream::delivery_permit`]), so once `cancel`
//! returns no item can reach the consumer's downstream, even if the cancel ran
//! on a different thread than the delivery.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use futures::Stream;
use parking_lot::{Mutex, MutexGuard};

use crate::error::{LocationError, ProviderError};
use crate::position::Position;
use crate::protocol_constants::MAX_PENDING_FAILURES;
use crate::provider::{
    LocationCallback, LocationProvider, LocationRequest, LocationResult, RegistrationId,
};

/// One item of the update stream.
pub type StreamItem = Result<Position, LocationError>;

/// An undelivered item, in arrival order.
enum Pending {
    Fix(Position),
    Failure(ProviderError),
}

/// Undelivered items of one subscription.
#[derive(Default)]
struct Slot {
    /// Undelivered items in arrival order. Only a trailing fix is ever
    /// replaced, so a failure always stays between the fixes around it.
    queue: VecDeque<Pending>,
    /// Number of [`Pending::Failure`] entries in `queue`.
    failures: usize,
    /// Failures discarded because too many were pending.
    lagged: usize,
    closed: bool,
    waker: Option<Waker>,
}

impl Slot {
    fn store_position(&mut self, position: Position) {
        if let Some(Pending::Fix(latest)) = self.queue.back_mut() {
            *latest = position;
            log::trace!("[LocationStream] Replaced undelivered position");
        } else {
            self.queue.push_back(Pending::Fix(position));
        }
    }

    fn store_failure(&mut self, error: ProviderError) {
        if self.failures >= MAX_PENDING_FAILURES {
            if let Some(oldest) = self
                .queue
                .iter()
                .position(|p| matches!(p, Pending::Failure(_)))
            {
                self.queue.remove(oldest);
                self.failures -= 1;
                self.lagged += 1;
            }
        }
        self.queue.push_back(Pending::Failure(error));
        self.failures += 1;
    }

    /// Takes the oldest undelivered item.
    fn take_next(&mut self) -> Option<StreamItem> {
        if self.lagged > 0 {
            return Some(Err(LocationError::Lagged(std::mem::take(&mut self.lagged))));
        }

        match self.queue.pop_front()? {
            Pending::Fix(position) => Some(Ok(position)),
            Pending::Failure(e) => {
                self.failures -= 1;
                Some(Err(LocationError::Provider(e)))
            }
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.failures = 0;
        self.lagged = 0;
    }
}

/// State shared between the handle, the stream and the provider callback.
struct Subscription {
    number: u64,
    provider: Arc<dyn LocationProvider>,
    registration: Mutex<Option<RegistrationId>>,
    slot: Mutex<Slot>,
    /// Delivery gate, held by the consumer while it hands an item on.
    gate: Mutex<()>,
    /// Set once, under `gate`.
    cancelled: AtomicBool,
}

impl Subscription {
    fn new(number: u64, provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            number,
            provider,
            registration: Mutex::new(None),
            slot: Mutex::new(Slot::default()),
            gate: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Provider callback entry point.
    fn on_sample(&self, sample: Result<LocationResult, ProviderError>) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.closed {
                return;
            }
            match sample {
                Ok(result) => {
                    let Some(raw) = result.last_location() else {
                        return;
                    };
                    let position = raw.position();
                    if position.is_valid() {
                        slot.store_position(position);
                    } else {
                        slot.store_failure(ProviderError::Sample(format!(
                            "invalid fix ({}, {})",
                            position.latitude, position.longitude
                        )));
                    }
                }
                Err(e) => slot.store_failure(e),
            }
            slot.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the subscription. Returns `false` if it was already cancelled.
    fn cancel(&self) -> bool {
        {
            let _gate = self.gate.lock();
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return false;
            }
        }

        let waker = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.clear();
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }

        if let Some(id) = self.registration.lock().take() {
            if let Err(e) = self.provider.remove_updates(id) {
                log::warn!(
                    "[LocationStream] Failed to remove {} for subscription {}: {}",
                    id,
                    self.number,
                    e
                );
            }
        }

        log::debug!("[LocationStream] Subscription {} cancelled", self.number);
        true
    }
}

/// Single-use handle to one live subscription.
///
/// Dropping the handle cancels the subscription.
pub struct StreamHandle {
    subscription: Arc<Subscription>,
}

impl StreamHandle {
    /// Sequence number of the subscription, unique per adapter.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.subscription.number
    }

    /// Cancels the subscription. Idempotent.
    pub fn cancel(&self) {
        self.subscription.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.subscription.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.subscription.number)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Proof that the subscription was live when taken.
///
/// While held, a concurrent cancel blocks until the permit is dropped.
pub struct DeliveryPermit<'a> {
    _gate: MutexGuard<'a, ()>,
}

/// Stream of positions (and per-sample failures) for one subscription.
///
/// Ends once the subscription is cancelled. Dropping the stream cancels the
/// subscription.
pub struct PositionStream {
    subscription: Arc<Subscription>,
}

impl PositionStream {
    /// Acquires the delivery gate, or `None` if the subscription was cancelled.
    ///
    /// Consumers hold the permit while handing an item downstream. The
    /// downstream must not cancel this subscription while the permit is held.
    pub fn delivery_permit(&self) -> Option<DeliveryPermit<'_>> {
        let gate = self.subscription.gate.lock();
        if self.subscription.is_cancelled() {
            None
        } else {
            Some(DeliveryPermit { _gate: gate })
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.subscription.number
    }
}

impl Stream for PositionStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut slot = self.subscription.slot.lock();
        if let Some(item) = slot.take_next() {
            return Poll::Ready(Some(item));
        }
        if slot.closed {
            return Poll::Ready(None);
        }
        match slot.waker {
            Some(ref w) if w.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for PositionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionStream")
            .field("id", &self.subscription.number)
            .field("cancelled", &self.subscription.is_cancelled())
            .finish()
    }
}

impl Drop for PositionStream {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}

/// Turns a push-based [`LocationProvider`] into subscribe/cancel streams.
pub struct LocationStream {
    provider: Arc<dyn LocationProvider>,
    request: LocationRequest,
    active: Mutex<Option<Arc<Subscription>>>,
    next_number: AtomicU64,
}

impl LocationStream {
    /// Creates an adapter using the real-time high-accuracy request profile.
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self::with_request(provider, LocationRequest::high_accuracy())
    }

    pub fn with_request(provider: Arc<dyn LocationProvider>, request: LocationRequest) -> Self {
        Self {
            provider,
            request,
            active: Mutex::new(None),
            next_number: AtomicU64::new(1),
        }
    }

    /// The request profile used for every registration.
    #[must_use]
    pub fn request(&self) -> &LocationRequest {
        &self.request
    }

    /// Registers with the provider and returns the new subscription.
    ///
    /// Any previous subscription of this adapter is cancelled first. The
    /// provider registration is complete when this returns.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if it rejects the registration; no
    /// subscription is active afterwards.
    pub fn subscribe(&self) -> Result<(StreamHandle, PositionStream), ProviderError> {
        // Cancel outside the lock: it may wait for an in-flight delivery.
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            supersede(&previous);
        }

        let number = self.next_number.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription::new(number, Arc::clone(&self.provider)));

        let weak: Weak<Subscription> = Arc::downgrade(&subscription);
        let callback: LocationCallback = Arc::new(move |sample| {
            if let Some(subscription) = weak.upgrade() {
                subscription.on_sample(sample);
            }
        });

        let id = self.provider.request_updates(&self.request, callback)?;
        *subscription.registration.lock() = Some(id);
        let raced = self.active.lock().replace(Arc::clone(&subscription));
        if let Some(raced) = raced {
            supersede(&raced);
        }

        log::info!(
            "[LocationStream] Subscription {} registered as {}",
            number,
            id
        );

        Ok((
            StreamHandle {
                subscription: Arc::clone(&subscription),
            },
            PositionStream { subscription },
        ))
    }

    /// Cancels `handle`'s subscription. Idempotent.
    pub fn cancel(&self, handle: &StreamHandle) {
        handle.cancel();
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, &handle.subscription))
        {
            active.take();
        }
    }

    /// Returns whether a live subscription exists.
    #[must_use]
    pub fn has_active_subscription(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_cancelled())
    }
}

fn supersede(previous: &Subscription) {
    if previous.cancel() {
        log::info!(
            "[LocationStream] Subscription {} superseded",
            previous.number
        );
    }
}

impl Drop for LocationStream {
    fn drop(&mut self) {
        if let Some(subscription) = self.active.get_mut().take() {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Priority, RawLocation};
    use crate::test_fixtures::ManualProvider;
    use futures::{FutureExt, StreamExt};

    fn adapter() -> (Arc<ManualProvider>, LocationStream) {
        let provider = ManualProvider::new();
        let stream = LocationStream::new(provider.clone());
        (provider, stream)
    }

    #[test]
    fn subscribe_registers_once_with_real_time_profile() {
        let (provider, adapter) = adapter();
        assert_eq!(provider.request_calls.load(Ordering::SeqCst), 0);

        let (_handle, _stream) = adapter.subscribe().unwrap();

        assert_eq!(provider.request_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.active_registrations(), 1);
        let request = provider.requests.lock()[0];
        assert_eq!(request.priority, Priority::HighAccuracy);
        assert!(request.interval.is_zero());
        assert!(request.max_wait.is_zero());
        assert!(adapter.has_active_subscription());
    }

    #[tokio::test]
    async fn samples_arrive_in_order() {
        let (provider, adapter) = adapter();
        let (_handle, mut stream) = adapter.subscribe().unwrap();

        provider.push(10.0, 20.0);
        assert_eq!(stream.next().await, Some(Ok(Position::new(10.0, 20.0))));
        provider.push(10.1, 20.1);
        assert_eq!(stream.next().await, Some(Ok(Position::new(10.1, 20.1))));
    }

    #[test]
    fn slow_consumer_only_sees_latest_position() {
        let (provider, adapter) = adapter();
        let (_handle, mut stream) = adapter.subscribe().unwrap();

        provider.push(1.0, 1.0);
        provider.push(2.0, 2.0);
        provider.push(3.0, 3.0);

        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Ok(Position::new(3.0, 3.0))))
        );
        assert!(stream.next().now_or_never().is_none());
    }

    #[test]
    fn failure_between_fixes_keeps_both_fixes() {
        let (provider, adapter) = adapter();
        let (_handle, mut stream) = adapter.subscribe().unwrap();

        provider.push(1.0, 1.0);
        provider.fail("no fix");
        provider.push(2.0, 2.0);
        provider.push(3.0, 3.0);

        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Ok(Position::new(1.0, 1.0))))
        );
        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Err(LocationError::Provider(ProviderError::Sample(
                "no fix".to_string()
            )))))
        );
        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Ok(Position::new(3.0, 3.0))))
        );
        assert!(stream.next().now_or_never().is_none());
    }

    #[test]
    fn position_before_failure_is_delivered_first() {
        let (provider, adapter) = adapter();
        let (_handle, mut stream) = adapter.subscribe().unwrap();

        provider.push(1.0, 1.0);
        provider.fail("no fix");

        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Ok(Position::new(1.0, 1.0))))
        );
        assert!(matches!(
            stream.next().now_or_never(),
            Some(Some(Err(LocationError::Provider(_))))
        ));
    }

    #[test]
    fn failure_overflow_is_reported_as_lagged() {
        let (provider, adapter) = adapter();
        let (_handle, mut stream) = adapter.subscribe().unwrap();

        for i in 0..MAX_PENDING_FAILURES + 3 {
            provider.fail(&format!("failure {i}"));
        }

        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Err(LocationError::Lagged(3))))
        );
        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Err(LocationError::Provider(ProviderError::Sample(
                "failure 3".to_string()
            )))))
        );
    }

    #[test]
    fn empty_results_are_ignored_and_invalid_fixes_fail() {
        let (provider, adapter) = adapter();
        let (_handle, mut stream) = adapter.subscribe().unwrap();

        provider.deliver(Ok(LocationResult::default()));
        assert!(stream.next().now_or_never().is_none());

        provider.deliver(Ok(LocationResult::single(RawLocation {
            latitude: 120.0,
            longitude: 0.0,
            accuracy_m: None,
        })));
        assert!(matches!(
            stream.next().now_or_never(),
            Some(Some(Err(LocationError::Provider(ProviderError::Sample(_)))))
        ));
    }

    #[test]
    fn cancel_twice_deregisters_once() {
        let (provider, adapter) = adapter();
        let (handle, _stream) = adapter.subscribe().unwrap();

        adapter.cancel(&handle);
        adapter.cancel(&handle);
        handle.cancel();

        assert_eq!(provider.remove_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.active_registrations(), 0);
        assert!(handle.is_cancelled());
        assert!(!adapter.has_active_subscription());
    }

    #[test]
    fn nothing_is_emitted_after_cancel() {
        let (provider, adapter) = adapter();
        let (handle, mut stream) = adapter.subscribe().unwrap();

        provider.push(1.0, 1.0);
        handle.cancel();
        provider.push(2.0, 2.0);

        assert_eq!(stream.next().now_or_never(), Some(None));
        assert!(stream.delivery_permit().is_none());
    }

    #[tokio::test]
    async fn cancel_from_another_thread_ends_pending_stream() {
        let (_provider, adapter) = adapter();
        let (handle, mut stream) = adapter.subscribe().unwrap();

        let waiter = tokio::spawn(async move { stream.next().await });
        tokio::task::yield_now().await;

        std::thread::spawn(move || handle.cancel()).join().unwrap();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[test]
    fn dropping_stream_deregisters() {
        let (provider, adapter) = adapter();
        let (handle, stream) = adapter.subscribe().unwrap();

        drop(stream);

        assert!(handle.is_cancelled());
        assert_eq!(provider.active_registrations(), 0);
    }

    #[test]
    fn resubscribe_after_cancel_registers_from_scratch() {
        let (provider, adapter) = adapter();
        let (first, _s1) = adapter.subscribe().unwrap();
        adapter.cancel(&first);

        let (second, mut stream) = adapter.subscribe().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(provider.request_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.active_registrations(), 1);

        provider.push(5.0, 5.0);
        assert_eq!(
            stream.next().now_or_never(),
            Some(Some(Ok(Position::new(5.0, 5.0))))
        );
    }

    #[test]
    fn second_subscribe_supersedes_first() {
        let (provider, adapter) = adapter();
        let (first, mut first_stream) = adapter.subscribe().unwrap();
        let (second, mut second_stream) = adapter.subscribe().unwrap();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(provider.active_registrations(), 1);

        provider.push(7.0, 7.0);

        assert_eq!(first_stream.next().now_or_never(), Some(None));
        assert_eq!(
            second_stream.next().now_or_never(),
            Some(Some(Ok(Position::new(7.0, 7.0))))
        );
    }

    #[test]
    fn rejected_registration_surfaces_error() {
        let (provider, adapter) = adapter();
        provider.reject.store(true, Ordering::SeqCst);

        let err = adapter.subscribe().err().unwrap();

        assert!(matches!(err, ProviderError::Rejected(_)));
        assert!(!adapter.has_active_subscription());
        assert_eq!(provider.active_registrations(), 0);
    }

    #[test]
    fn dropping_adapter_cancels_live_subscription() {
        let (provider, adapter) = adapter();
        let (handle, _stream) = adapter.subscribe().unwrap();

        drop(adapter);

        assert!(handle.is_cancelled());
        assert_eq!(provider.active_registrations(), 0);
    }
}
