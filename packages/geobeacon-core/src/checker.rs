//! Precondition checks that gate streaming.
//!
//! Two binary conditions must hold before a pipeline may be built: location
//! permission at the requested scope, and at least one positioning backend
//! switched on. Both can change out-of-band at any time, so
//! [`PreconditionValidator`] queries its collaborators on every call and
//! caches nothing.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scope of location access being asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionScope {
    /// Approximate (network-level) location.
    Coarse,
    /// Precise (satellite-level) location.
    #[default]
    Fine,
    /// Location access while the host is not in the foreground.
    Background,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coarse => "coarse",
            Self::Fine => "fine",
            Self::Background => "background",
        };
        f.write_str(name)
    }
}

/// Answers whether location access has been granted.
pub trait PermissionChecker: Send + Sync {
    fn is_granted(&self, scope: PermissionScope) -> bool;
}

/// Answers whether any positioning backend is active.
pub trait PositioningChecker: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Fixed permission answer, for hosts that learn the grant out-of-band.
///
/// A grant at [`PermissionScope::Fine`] implies coarse access; background
/// access must be granted explicitly.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission {
    pub granted: bool,
    pub scope: PermissionScope,
}

impl PermissionChecker for StaticPermission {
    fn is_granted(&self, scope: PermissionScope) -> bool {
        if !self.granted {
            return false;
        }
        match (self.scope, scope) {
            (held, asked) if held == asked => true,
            (PermissionScope::Fine, PermissionScope::Coarse) => true,
            (PermissionScope::Background, _) => true,
            _ => false,
        }
    }
}

/// Availability of the individual positioning backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositioningBackends {
    /// Satellite (GNSS) positioning.
    pub satellite: bool,
    /// Network-assisted positioning (cell towers, Wi-Fi).
    pub network: bool,
}

impl PositioningChecker for PositioningBackends {
    fn is_enabled(&self) -> bool {
        self.satellite || self.network
    }
}

/// Outcome of one precondition evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationResult {
    pub permission_granted: bool,
    pub positioning_enabled: bool,
}

impl ValidationResult {
    /// Returns whether streaming may start.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.permission_granted && self.positioning_enabled
    }
}

/// Combines the permission and positioning checks.
#[derive(Clone)]
pub struct PreconditionValidator {
    permission: Arc<dyn PermissionChecker>,
    positioning: Arc<dyn PositioningChecker>,
    scope: PermissionScope,
}

impl PreconditionValidator {
    /// Creates a validator that asks for `scope` permission.
    pub fn new(
        permission: Arc<dyn PermissionChecker>,
        positioning: Arc<dyn PositioningChecker>,
        scope: PermissionScope,
    ) -> Self {
        Self {
            permission,
            positioning,
            scope,
        }
    }

    /// The scope this validator asks for.
    #[must_use]
    pub fn scope(&self) -> PermissionScope {
        self.scope
    }

    pub fn check_permission(&self, scope: PermissionScope) -> bool {
        self.permission.is_granted(scope)
    }

    pub fn check_positioning_enabled(&self) -> bool {
        self.positioning.is_enabled()
    }

    /// Evaluates both preconditions against the current system state.
    pub fn validate(&self) -> ValidationResult {
        ValidationResult {
            permission_granted: self.check_permission(self.scope),
            positioning_enabled: self.check_positioning_enabled(),
        }
    }
}
