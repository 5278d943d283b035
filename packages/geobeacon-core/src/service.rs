//! Long-running location service.
//!
//! [`LocationService`] owns the running pipeline for the life of the host's
//! background unit. Its states are
//! `Stopped → Starting → Running → Stopping → Stopped`:
//!
//! - **Starting**: builds a fresh pipeline (preconditions re-evaluated) and
//!   acquires the keep-alive slot. Any failure aborts the start and is
//!   returned to the caller.
//! - **Running**: one subscription is forwarded to the sink on a spawned
//!   task. Per-sample failures go to the error callback and never leave
//!   Running.
//! - A start while Running replaces the subscription (cancel, then
//!   subscribe) instead of adding one.
//! - **Stopping**: cancels the subscription and releases the keep-alive
//!   slot. Reachable from every state, and also run on drop.
//!
//! Hosts deliver start/stop commands through a [`CommandSender`]; the
//! [`ServiceController`] applies only the most recent one.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::checker::PreconditionValidator;
use crate::error::{ErrorCode, ProviderError, ServiceError, ServiceResult};
use crate::keep_alive::{KeepAlive, KeepAliveGuard};
use crate::pipeline::{check_preconditions, PipelineConfig, RunningPipeline};
use crate::position::Position;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::stream::StreamHandle;

/// Keep-alive slot the service holds while running.
pub const NOTIFICATION_ID: u32 = 110;

/// Request code hosts use when asking the user for location permission.
pub const PERMISSION_REQUEST_ID: u32 = 1000;

/// Lifecycle state of a [`LocationService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Everything the service holds while running.
///
/// Field order is teardown order.
struct Active {
    handle: StreamHandle,
    pipeline: Arc<RunningPipeline>,
    _keep_alive: KeepAliveGuard,
}

#[derive(Default)]
struct Inner {
    active: Option<Active>,
    last_error: Option<ServiceError>,
}

/// Keeps a location pipeline streaming independently of any UI.
///
/// `inner` is only ever locked briefly; cancelling a subscription (which
/// waits for an in-flight delivery) happens outside it, so sinks may call
/// the observers below from `publish`.
pub struct LocationService {
    config: PipelineConfig,
    validator: PreconditionValidator,
    keep_alive: Arc<dyn KeepAlive>,
    notification_id: u32,
    spawner: TokioSpawner,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
    inner: Mutex<Inner>,
    state: watch::Sender<ServiceState>,
}

impl LocationService {
    /// Creates a stopped service.
    ///
    /// # Arguments
    /// * `config` - Dependencies used to build a pipeline on every fresh start
    /// * `validator` - Preconditions checked on every start
    /// * `keep_alive` - Host resource held while running
    /// * `spawner` - Runs the update-forwarding task
    pub fn new(
        config: PipelineConfig,
        validator: PreconditionValidator,
        keep_alive: Arc<dyn KeepAlive>,
        spawner: TokioSpawner,
    ) -> Self {
        let (state, _) = watch::channel(ServiceState::Stopped);
        Self {
            config,
            validator,
            keep_alive,
            notification_id: NOTIFICATION_ID,
            spawner,
            lifecycle: Mutex::new(()),
            inner: Mutex::new(Inner::default()),
            state,
        }
    }

    /// Uses `id` instead of [`NOTIFICATION_ID`] for the keep-alive slot.
    #[must_use]
    pub fn with_notification_id(mut self, id: u32) -> Self {
        self.notification_id = id;
        self
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Returns whether a live provider subscription exists.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner
            .lock()
            .active
            .as_ref()
            .is_some_and(|a| a.pipeline.has_active_subscription())
    }

    /// Returns whether the keep-alive slot is held.
    #[must_use]
    pub fn holds_keep_alive(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// The last position published while running, if any.
    #[must_use]
    pub fn last_location(&self) -> Option<Position> {
        self.inner
            .lock()
            .active
            .as_ref()
            .and_then(|a| a.pipeline.last_location())
    }

    /// The error that aborted the most recent failed start.
    #[must_use]
    pub fn last_error(&self) -> Option<ServiceError> {
        self.inner.lock().last_error.clone()
    }

    fn set_state(&self, state: ServiceState) {
        self.state.send_replace(state);
    }

    fn running_pipeline(&self) -> Option<Arc<RunningPipeline>> {
        self.inner
            .lock()
            .active
            .as_ref()
            .map(|a| Arc::clone(&a.pipeline))
    }

    /// Starts streaming, or replaces the subscription if already running.
    ///
    /// # Errors
    ///
    /// Returns why the start was aborted; the service is then `Stopped`
    /// and holds nothing.
    pub fn start(&self) -> ServiceResult<()> {
        let _lifecycle = self.lifecycle.lock();

        let result = match self.running_pipeline() {
            Some(pipeline) => self.restart(&pipeline),
            None => self.start_fresh(),
        };

        match &result {
            Ok(()) => self.inner.lock().last_error = None,
            Err(e) => {
                log::error!("[LocationService] Start failed ({}): {}", e.code(), e);
                self.inner.lock().last_error = Some(e.clone());
            }
        }
        result
    }

    fn start_fresh(&self) -> ServiceResult<()> {
        self.set_state(ServiceState::Starting);

        let active = self.build_active().inspect_err(|_| {
            self.set_state(ServiceState::Stopped);
        })?;

        self.inner.lock().active = Some(active);
        self.set_state(ServiceState::Running);
        log::info!("[LocationService] Running");
        Ok(())
    }

    fn build_active(&self) -> ServiceResult<Active> {
        let pipeline = Arc::new(self.config.clone().build(&self.validator)?);
        let keep_alive = KeepAliveGuard::acquire(Arc::clone(&self.keep_alive), self.notification_id)?;
        // On error the guard drops here and releases the slot.
        let handle = self.begin_forwarding(&pipeline)?;

        Ok(Active {
            handle,
            pipeline,
            _keep_alive: keep_alive,
        })
    }

    fn restart(&self, pipeline: &RunningPipeline) -> ServiceResult<()> {
        self.set_state(ServiceState::Starting);

        if let Err(e) = check_preconditions(&self.validator) {
            log::warn!("[LocationService] Preconditions lost on restart, stopping");
            self.teardown();
            return Err(e.into());
        }

        // Subscribing cancels the previous subscription first.
        match self.begin_forwarding(pipeline) {
            Ok(handle) => {
                let previous = self
                    .inner
                    .lock()
                    .active
                    .as_mut()
                    .map(|a| std::mem::replace(&mut a.handle, handle));
                drop(previous);
                self.set_state(ServiceState::Running);
                log::info!("[LocationService] Subscription replaced");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e.into())
            }
        }
    }

    /// Subscribes and spawns the task forwarding the new stream.
    fn begin_forwarding(&self, pipeline: &RunningPipeline) -> Result<StreamHandle, ProviderError> {
        let (handle, stream) = pipeline.subscribe()?;
        let forwarder = pipeline.forwarder();
        self.spawner.spawn(async move {
            forwarder.run(stream).await;
        });
        Ok(handle)
    }

    /// Stops streaming and releases everything. Idempotent.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.holds_keep_alive() {
            log::debug!("[LocationService] Stop requested while stopped");
            self.set_state(ServiceState::Stopped);
            return;
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.set_state(ServiceState::Stopping);

        let active = self.inner.lock().active.take();
        if let Some(active) = active {
            active.pipeline.cancel(&active.handle);
            drop(active);
        }

        self.set_state(ServiceState::Stopped);
        log::info!("[LocationService] Stopped");
    }
}

impl Drop for LocationService {
    fn drop(&mut self) {
        if self.inner.get_mut().active.is_some() {
            self.teardown();
        }
    }
}

/// Command delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Start,
    Stop,
}

/// Sending half of the command channel.
///
/// Commands are not queued: a command sent before the controller picked up
/// the previous one replaces it.
#[derive(Clone)]
pub struct CommandSender {
    tx: Arc<watch::Sender<Option<ServiceCommand>>>,
}

impl CommandSender {
    pub fn send(&self, command: ServiceCommand) {
        self.tx.send_replace(Some(command));
    }

    pub fn start(&self) {
        self.send(ServiceCommand::Start);
    }

    pub fn stop(&self) {
        self.send(ServiceCommand::Stop);
    }
}

/// Creates a command channel and the controller that consumes it.
pub fn command_channel(
    service: Arc<LocationService>,
    cancel: CancellationToken,
) -> (CommandSender, ServiceController) {
    let (tx, rx) = watch::channel(None);
    (
        CommandSender { tx: Arc::new(tx) },
        ServiceController {
            service,
            commands: rx,
            cancel,
        },
    )
}

/// Applies host commands to a [`LocationService`].
pub struct ServiceController {
    service: Arc<LocationService>,
    commands: watch::Receiver<Option<ServiceCommand>>,
    cancel: CancellationToken,
}

impl ServiceController {
    /// Runs until cancelled or every sender is dropped, then stops the
    /// service.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = self.commands.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let command = *self.commands.borrow_and_update();
                    self.apply(command);
                }
            }
        }

        self.service.stop();
        log::debug!("[ServiceController] Exited");
    }

    fn apply(&self, command: Option<ServiceCommand>) {
        match command {
            Some(ServiceCommand::Start) => {
                // Already logged and recorded by the service.
                let _ = self.service.start();
            }
            Some(ServiceCommand::Stop) => self.service.stop(),
            None => {}
        }
    }
}
