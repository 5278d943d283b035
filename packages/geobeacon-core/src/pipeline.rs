//! Pipeline construction and update forwarding.
//!
//! [`PipelineConfig`] collects the caller's dependencies; [`RunningPipeline::build`]
//! is the only way to turn it into a pipeline. Construction checks, in order:
//!
//! 1. a provider client was supplied ([`BuildError::MissingProviderClient`])
//! 2. a dispatch sink was supplied ([`BuildError::MissingDispatchSink`])
//! 3. location permission is granted ([`BuildError::PermissionDenied`])
//! 4. positioning is enabled ([`BuildError::PositioningDisabled`])
//!
//! Nothing is registered with the provider during construction.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;

use crate::checker::PreconditionValidator;
use crate::error::{BuildError, LocationError, ProviderError};
use crate::position::Position;
use crate::provider::{LocationProvider, LocationRequest};
use crate::sink::DispatchSink;
use crate::stream::{LocationStream, PositionStream, StreamHandle, StreamItem};

/// Callback invoked for every failure on the update stream.
pub type ErrorHandler = Arc<dyn Fn(&LocationError) + Send + Sync>;

/// Dependencies for building a [`RunningPipeline`].
#[derive(Clone, Default)]
pub struct PipelineConfig {
    provider: Option<Arc<dyn LocationProvider>>,
    sink: Option<Arc<dyn DispatchSink>>,
    on_error: Option<ErrorHandler>,
    request: LocationRequest,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the location provider client (required).
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the sink every update is published to (required).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DispatchSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the per-failure callback. Defaults to logging the failure.
    #[must_use]
    pub fn on_error(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Overrides the real-time request profile.
    #[must_use]
    pub fn request(mut self, request: LocationRequest) -> Self {
        self.request = request;
        self
    }

    /// Shorthand for [`RunningPipeline::build`].
    pub fn build(self, validator: &PreconditionValidator) -> Result<RunningPipeline, BuildError> {
        RunningPipeline::build(self, validator)
    }
}

/// Evaluates the preconditions afresh and maps the first failure to a
/// [`BuildError`].
pub fn check_preconditions(validator: &PreconditionValidator) -> Result<(), BuildError> {
    let validation = validator.validate();
    if !validation.permission_granted {
        return Err(BuildError::PermissionDenied(validator.scope()));
    }
    if !validation.positioning_enabled {
        return Err(BuildError::PositioningDisabled);
    }
    Ok(())
}

fn log_error(err: &LocationError) {
    log::error!("[Pipeline] Location update failed: {}", err);
}

/// Counters reported when a forwarding run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub published: usize,
    pub failures: usize,
}

/// Moves stream items to the sink and the error callback.
///
/// Detached from the pipeline so it can run on a spawned task.
#[derive(Clone)]
pub struct Forwarder {
    sink: Arc<dyn DispatchSink>,
    on_error: ErrorHandler,
    last_location: Arc<Mutex<Option<Position>>>,
}

impl Forwarder {
    /// Forwards items until the stream ends (i.e. its subscription is cancelled).
    ///
    /// Failures go to the error callback and do not end the run.
    pub async fn run(self, mut stream: PositionStream) -> ForwardStats {
        let mut stats = ForwardStats::default();

        while let Some(item) = stream.next().await {
            let Some(_permit) = stream.delivery_permit() else {
                break;
            };
            self.deliver(item, &mut stats);
        }

        log::debug!(
            "[Pipeline] Subscription {} ended: {} published, {} failed",
            stream.id(),
            stats.published,
            stats.failures
        );
        stats
    }

    fn deliver(&self, item: StreamItem, stats: &mut ForwardStats) {
        match item {
            Ok(position) => {
                *self.last_location.lock() = Some(position);
                self.sink.publish(position);
                stats.published += 1;
            }
            Err(e) => {
                (self.on_error)(&e);
                stats.failures += 1;
            }
        }
    }
}

/// A validated pipeline, ready to stream.
///
/// Owns the update source adapter and therefore at most one live
/// subscription.
pub struct RunningPipeline {
    stream: LocationStream,
    forwarder: Forwarder,
}

impl RunningPipeline {
    /// Builds a pipeline from `config`, checking dependencies before
    /// preconditions.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a [`BuildError`].
    pub fn build(
        config: PipelineConfig,
        validator: &PreconditionValidator,
    ) -> Result<Self, BuildError> {
        let provider = config.provider.ok_or(BuildError::MissingProviderClient)?;
        let sink = config.sink.ok_or(BuildError::MissingDispatchSink)?;

        check_preconditions(validator)?;

        let on_error = config
            .on_error
            .unwrap_or_else(|| Arc::new(log_error) as ErrorHandler);

        Ok(Self {
            stream: LocationStream::with_request(provider, config.request),
            forwarder: Forwarder {
                sink,
                on_error,
                last_location: Arc::new(Mutex::new(None)),
            },
        })
    }

    /// Starts a new subscription, superseding any previous one.
    pub fn subscribe(&self) -> Result<(StreamHandle, PositionStream), ProviderError> {
        self.stream.subscribe()
    }

    /// Cancels `handle`'s subscription. Idempotent.
    pub fn cancel(&self, handle: &StreamHandle) {
        self.stream.cancel(handle);
    }

    #[must_use]
    pub fn has_active_subscription(&self) -> bool {
        self.stream.has_active_subscription()
    }

    /// Returns a forwarder bound to this pipeline's sink and error callback.
    pub fn forwarder(&self) -> Forwarder {
        self.forwarder.clone()
    }

    /// Forwards `stream` to the sink until it ends.
    pub async fn forward(&self, stream: PositionStream) -> ForwardStats {
        self.forwarder().run(stream).await
    }

    /// The last position handed to the sink, if any.
    #[must_use]
    pub fn last_location(&self) -> Option<Position> {
        *self.forwarder.last_location.lock()
    }
}
