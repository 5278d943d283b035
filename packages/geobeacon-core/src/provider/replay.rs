//! Provider that replays a configured route.
//!
//! Used by hosts without a hardware positioning source (headless servers,
//! demos, field-test playback). Each registration gets its own background task
//! pushing one waypoint per tick into the registered callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    LocationCallback, LocationProvider, LocationRequest, LocationResult, RawLocation,
    RegistrationId,
};
use crate::error::ProviderError;
use crate::position::Position;
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Route and pacing for a [`ReplayProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Waypoints pushed in order.
    pub waypoints: Vec<Position>,
    /// Delay between waypoints in milliseconds.
    pub interval_ms: u64,
    /// Start over after the last waypoint instead of going quiet.
    pub loop_route: bool,
    /// Report a sample failure instead of a fix on every n-th tick.
    pub failure_every: Option<u32>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            waypoints: Vec::new(),
            interval_ms: 1000,
            loop_route: true,
            failure_every: None,
        }
    }
}

impl ReplayConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be >= 1".to_string());
        }
        if self.failure_every == Some(0) {
            return Err("failure_every must be >= 1 when set".to_string());
        }
        if let Some((i, wp)) = self
            .waypoints
            .iter()
            .enumerate()
            .find(|(_, wp)| !wp.is_valid())
        {
            return Err(format!(
                "waypoint {} ({}, {}) is outside WGS84 bounds",
                i, wp.latitude, wp.longitude
            ));
        }
        Ok(())
    }

    fn interval(&self, request: &LocationRequest) -> Duration {
        Duration::from_millis(self.interval_ms).max(request.interval)
    }
}

/// [`LocationProvider`] that replays a fixed route on a timer.
pub struct ReplayProvider {
    config: ReplayConfig,
    spawner: TokioSpawner,
    registrations: Mutex<HashMap<RegistrationId, CancellationToken>>,
    next_id: AtomicU64,
}

impl ReplayProvider {
    pub fn new(config: ReplayConfig, spawner: TokioSpawner) -> Self {
        Self {
            config,
            spawner,
            registrations: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the number of live registrations.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl LocationProvider for ReplayProvider {
    fn request_updates(
        &self,
        request: &LocationRequest,
        callback: LocationCallback,
    ) -> Result<RegistrationId, ProviderError> {
        if self.config.waypoints.is_empty() {
            return Err(ProviderError::Rejected(
                "replay route has no waypoints".to_string(),
            ));
        }
        // A zero period or failure stride would panic inside the task.
        if let Err(e) = self.config.validate() {
            return Err(ProviderError::Rejected(format!(
                "invalid replay config: {}",
                e
            )));
        }

        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        self.registrations.lock().insert(id, token.clone());

        let waypoints = self.config.waypoints.clone();
        let loop_route = self.config.loop_route;
        let failure_every = self.config.failure_every;
        let period = self.config.interval(request);

        log::info!(
            "[Replay] {} registered: {} waypoint(s) every {:?}",
            id,
            waypoints.len(),
            period
        );

        self.spawner.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut tick: u64 = 0;
            let take = if loop_route { usize::MAX } else { waypoints.len() };
            let mut route = waypoints.iter().cycle().take(take).peekable();

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tick += 1;

                if route.peek().is_none() {
                    log::debug!("[Replay] {} route finished", id);
                    break;
                }

                if failure_every.is_some_and(|n| tick % u64::from(n) == 0) {
                    callback(Err(ProviderError::Sample(format!(
                        "simulated fix loss at tick {}",
                        tick
                    ))));
                    continue;
                }

                if let Some(wp) = route.next() {
                    callback(Ok(LocationResult::single(RawLocation::from(*wp))));
                }
            }
        });

        Ok(id)
    }

    fn remove_updates(&self, id: RegistrationId) -> Result<(), ProviderError> {
        if let Some(token) = self.registrations.lock().remove(&id) {
            token.cancel();
            log::info!("[Replay] {} removed", id);
        }
        Ok(())
    }
}

impl Drop for ReplayProvider {
    fn drop(&mut self) {
        for (_, token) in self.registrations.lock().drain() {
            token.cancel();
        }
    }
}
