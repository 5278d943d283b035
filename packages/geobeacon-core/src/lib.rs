//! GeoBeacon Core - background location streaming.
//!
//! This crate turns a push-style positioning source into a cancellable stream
//! of positions and keeps that stream flowing to a dispatch sink from a
//! long-running service. It is shared by every host process; the headless
//! server in `apps/server` is one of them.
//!
//! # Architecture
//!
//! - [`stream`]: Update Source Adapter over a [`LocationProvider`]
//! - [`checker`]: Precondition Validator (permission, positioning)
//! - [`pipeline`]: Builder / construction validation and update forwarding
//! - [`sink`]: Dispatch Sink capability and implementations
//! - [`service`]: Service Lifecycle Manager and its command channel
//! - [`bootstrap`]: Composition root used by hosts
//!
//! # Abstraction Traits
//!
//! Platform concerns stay behind traits so the core runs anywhere:
//!
//! - [`LocationProvider`](provider::LocationProvider): Positioning source
//! - [`PermissionChecker`](checker::PermissionChecker) and
//!   [`PositioningChecker`](checker::PositioningChecker): Environment queries
//! - [`DispatchSink`](sink::DispatchSink): Where updates go
//! - [`Geocoder`](geocode::Geocoder): Place names for outgoing messages
//! - [`KeepAlive`](keep_alive::KeepAlive): Host resource keeping the process alive
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks

#![warn(clippy::all)]

pub mod bootstrap;
pub mod checker;
pub mod config;
pub mod error;
pub mod geocode;
pub mod keep_alive;
pub mod pipeline;
pub mod position;
pub mod protocol_constants;
pub mod provider;
pub mod runtime;
pub mod service;
pub mod sink;
pub mod stream;

#[cfg(test)]
mod test_fixtures;

// Re-export commonly used types at the crate root
pub use checker::{
    PermissionChecker, PermissionScope, PositioningBackends, PositioningChecker,
    PreconditionValidator, StaticPermission, ValidationResult,
};
pub use config::Config;
pub use error::{
    BuildError, ErrorCode, KeepAliveError, LocationError, ProviderError, ServiceError,
    ServiceResult,
};
pub use geocode::{Geocoder, KnownPlace, NoopGeocoder, Place, PlaceTable};
pub use keep_alive::{KeepAlive, KeepAliveGuard, LoggingKeepAlive, NoopKeepAlive};
pub use pipeline::{ErrorHandler, ForwardStats, PipelineConfig, RunningPipeline};
pub use position::{LocationMessage, Position};
pub use provider::{
    LocationProvider, LocationRequest, LocationResult, Priority, RawLocation, ReplayConfig,
    ReplayProvider,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use service::{
    command_channel, CommandSender, LocationService, ServiceCommand, ServiceController,
    ServiceState,
};
pub use sink::{BroadcastSink, DispatchSink, LoggingSink, NoopSink};
pub use stream::{LocationStream, PositionStream, StreamHandle};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};
