//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place where the provider,
//! sink, validator, keep-alive and service are instantiated and wired
//! together.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checker::{PreconditionValidator, StaticPermission};
use crate::config::Config;
use crate::error::{ErrorCode, LocationError};
use crate::geocode::PlaceTable;
use crate::keep_alive::{KeepAlive, LoggingKeepAlive};
use crate::pipeline::PipelineConfig;
use crate::provider::{LocationProvider, ReplayProvider};
use crate::runtime::TokioSpawner;
use crate::service::{command_channel, CommandSender, LocationService};
use crate::sink::BroadcastSink;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// The long-running location service.
    pub service: Arc<LocationService>,
    /// Sink relaying location messages to listeners.
    pub sink: BroadcastSink,
    /// Push source feeding the service.
    pub provider: Arc<ReplayProvider>,
    /// Delivers start/stop commands to the service controller.
    pub commands: CommandSender,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    controller: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BootstrappedServices {
    /// Stops the controller and waits until the service has released its
    /// subscription and keep-alive slot.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();

        // The controller may still be applying a command it already received
        let controller = self.controller.lock().take();
        if let Some(controller) = controller {
            if let Err(e) = controller.await {
                log::warn!("[Bootstrap] Controller task failed: {}", e);
            }
        }
        self.service.stop();

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps the location service with its dependencies.
///
/// Wiring order:
///
/// 1. Shared infrastructure (spawner, cancellation token)
/// 2. Replay provider and broadcast sink
/// 3. Precondition validator and keep-alive
/// 4. Location service and its command controller (spawned)
///
/// The service starts `Stopped`; send [`CommandSender::start`] to begin.
///
/// # Errors
///
/// Returns the validation message if `config` is invalid or its replay
/// route is empty, since every start would then be rejected.
pub fn bootstrap_services(
    config: &Config,
    handle: tokio::runtime::Handle,
) -> Result<BootstrappedServices, String> {
    config.validate()?;
    if config.replay.waypoints.is_empty() {
        return Err("replay.waypoints must list at least one position".to_string());
    }

    let spawner = TokioSpawner::new(handle.clone());
    let cancel_token = CancellationToken::new();

    let provider = Arc::new(ReplayProvider::new(config.replay.clone(), spawner.clone()));
    let sink = BroadcastSink::with_geocoder(
        config.broadcast_capacity,
        Arc::new(PlaceTable::new(config.places.clone())),
    );

    let validator = PreconditionValidator::new(
        Arc::new(StaticPermission {
            granted: config.permission_granted,
            scope: config.permission_scope,
        }),
        Arc::new(config.positioning),
        config.permission_scope,
    );

    let pipeline = PipelineConfig::new()
        .provider(Arc::clone(&provider) as Arc<dyn LocationProvider>)
        .sink(Arc::new(sink.clone()))
        .on_error(Arc::new(|e: &LocationError| {
            log::warn!("[Bootstrap] Location update failed ({}): {}", e.code(), e);
        }));

    let service = Arc::new(
        LocationService::new(
            pipeline,
            validator,
            Arc::new(LoggingKeepAlive) as Arc<dyn KeepAlive>,
            spawner.clone(),
        )
        .with_notification_id(config.notification_id),
    );

    let (commands, controller) = command_channel(Arc::clone(&service), cancel_token.clone());
    let controller = handle.spawn(controller.run());

    log::info!(
        "[Bootstrap] Services ready: {} waypoint(s), {} known place(s)",
        config.replay.waypoints.len(),
        config.places.len()
    );

    Ok(BootstrappedServices {
        service,
        sink,
        provider,
        commands,
        spawner,
        cancel_token,
        controller: Arc::new(Mutex::new(Some(controller))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::KnownPlace;
    use crate::position::Position;
    use crate::provider::ReplayConfig;
    use crate::service::ServiceState;

    fn config() -> Config {
        Config {
            replay: ReplayConfig {
                waypoints: vec![Position::new(48.8566, 2.3522), Position::new(48.86, 2.35)],
                interval_ms: 10,
                loop_route: true,
                failure_every: None,
            },
            places: vec![KnownPlace {
                city: "Paris".to_string(),
                country: "France".to_string(),
                latitude: 48.8566,
                longitude: 2.3522,
                radius_km: 20.0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let bad = Config {
            broadcast_capacity: 0,
            ..config()
        };
        assert!(bootstrap_services(&bad, runtime.handle().clone()).is_err());
    }

    #[test]
    fn empty_route_fails_fast() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut routeless = config();
        routeless.replay.waypoints.clear();

        let err = bootstrap_services(&routeless, runtime.handle().clone())
            .err()
            .unwrap();
        assert!(err.contains("waypoints"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_pending_command_and_ignores_later_ones() {
        let services = bootstrap_services(&config(), tokio::runtime::Handle::current()).unwrap();

        // Not yet observed by the controller when shutdown begins.
        services.commands.start();
        services.shutdown().await;

        assert_eq!(services.service.state(), ServiceState::Stopped);
        assert!(!services.service.holds_keep_alive());
        assert_eq!(services.provider.registration_count(), 0);

        services.commands.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(services.service.state(), ServiceState::Stopped);
        assert_eq!(services.provider.registration_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_command_relays_geocoded_messages() {
        let services = bootstrap_services(&config(), tokio::runtime::Handle::current()).unwrap();
        let mut messages = services.sink.subscribe();

        services.commands.start();
        let first = messages.recv().await.unwrap();

        assert_eq!(first.city.as_deref(), Some("Paris"));
        assert_eq!(first.position(), Some(Position::new(48.8566, 2.3522)));
        assert_eq!(services.service.state(), ServiceState::Running);

        services.shutdown().await;

        assert_eq!(services.service.state(), ServiceState::Stopped);
        assert!(!services.service.holds_keep_alive());
        assert_eq!(services.provider.registration_count(), 0);
    }

    #[tokio::test]
    async fn denied_permission_leaves_service_stopped() {
        let config = Config {
            permission_granted: false,
            ..config()
        };
        let services = bootstrap_services(&config, tokio::runtime::Handle::current()).unwrap();

        let mut state = services.service.watch_state();
        services.commands.start();
        // Starting is published before the permission check fails.
        state.changed().await.unwrap();
        state
            .wait_for(|s| *s == ServiceState::Stopped)
            .await
            .unwrap();

        assert_eq!(
            services.service.last_error().map(|e| e.code()),
            Some("permission_denied")
        );
        services.shutdown().await;
    }
}
