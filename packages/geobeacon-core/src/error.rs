//! Centralized error types for the GeoBeacon core library.
//!
//! Errors are split by where they surface:
//! - [`BuildError`]: configuration and precondition failures from pipeline construction
//! - [`ProviderError`]: registration rejections and per-sample provider failures
//! - [`LocationError`]: per-item failures carried on the update stream
//! - [`KeepAliveError`]: the host refused the keep-alive resource
//! - [`ServiceError`]: anything that aborts a service start

use thiserror::Error;

use crate::checker::PermissionScope;

/// Trait for error types that provide machine-readable error codes.
///
/// Hosts relay these codes instead of the display strings, which may change.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Failure reported by the location provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider refused to register the update request.
    #[error("Location request rejected: {0}")]
    Rejected(String),

    /// The provider is not reachable at all.
    #[error("Location provider unavailable: {0}")]
    Unavailable(String),

    /// A single sample could not be produced; later samples may still arrive.
    #[error("Location sample failed: {0}")]
    Sample(String),
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "provider_rejected",
            Self::Unavailable(_) => "provider_unavailable",
            Self::Sample(_) => "sample_failed",
        }
    }
}

/// Failure delivered in place of a position on the update stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The provider reported a failure for one sample.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The consumer fell behind and this many provider failures were coalesced.
    #[error("{0} provider failure(s) dropped while the consumer was behind")]
    Lagged(usize),
}

impl ErrorCode for LocationError {
    fn code(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.code(),
            Self::Lagged(_) => "failures_lagged",
        }
    }
}

/// Reasons a pipeline could not be built.
///
/// Dependency checks always run before precondition checks, so a caller that
/// forgot a dependency sees that error rather than an environment failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("No location provider client was supplied")]
    MissingProviderClient,

    #[error("No dispatch sink was supplied")]
    MissingDispatchSink,

    /// Location permission is not granted at the requested scope.
    #[error("Location permission not granted ({0} scope)")]
    PermissionDenied(PermissionScope),

    /// Neither satellite nor network positioning is enabled.
    #[error("Positioning is disabled; enable GPS or network location")]
    PositioningDisabled,
}

impl BuildError {
    /// Returns whether the error stems from the caller's configuration
    /// rather than from the environment.
    ///
    /// Configuration errors never go away by retrying; precondition errors
    /// may once the user grants permission or enables positioning.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingProviderClient | Self::MissingDispatchSink)
    }
}

impl ErrorCode for BuildError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingProviderClient => "missing_provider_client",
            Self::MissingDispatchSink => "missing_dispatch_sink",
            Self::PermissionDenied(_) => "permission_denied",
            Self::PositioningDisabled => "positioning_disabled",
        }
    }
}

/// The host environment refused the keep-alive resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeepAliveError {
    #[error("Keep-alive refused: {0}")]
    Refused(String),
}

impl ErrorCode for KeepAliveError {
    fn code(&self) -> &'static str {
        match self {
            Self::Refused(_) => "keep_alive_refused",
        }
    }
}

/// Errors that abort a start attempt of the location service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Failed to build location pipeline: {0}")]
    Build(#[from] BuildError),

    #[error("Failed to subscribe to location updates: {0}")]
    Subscribe(#[from] ProviderError),

    #[error("Failed to keep the service alive: {0}")]
    KeepAlive(#[from] KeepAliveError),
}

impl ErrorCode for ServiceError {
    fn code(&self) -> &'static str {
        match self {
            Self::Build(e) => e.code(),
            Self::Subscribe(e) => e.code(),
            Self::KeepAlive(e) => e.code(),
        }
    }
}

/// Result alias for service start/stop operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
