//! Keep-alive resource for unattended background execution.
//!
//! Hosts that would otherwise reclaim an idle process (mobile OSes, service
//! managers) expose some token that marks the process as doing user-visible
//! work, such as a persistent notification. [`KeepAlive`] models that token;
//! [`KeepAliveGuard`] scopes it so it is released exactly once, whichever path
//! the service takes to shut down.

use std::sync::Arc;

use crate::error::KeepAliveError;

/// Host-provided keep-alive resource, identified by a slot id.
pub trait KeepAlive: Send + Sync {
    /// Marks the process as busy under `id`.
    fn acquire(&self, id: u32) -> Result<(), KeepAliveError>;

    /// Gives the slot back. Must tolerate ids that are not held.
    fn release(&self, id: u32);
}

/// Keep-alive for hosts that never reclaim the process.
pub struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {
    fn acquire(&self, _id: u32) -> Result<(), KeepAliveError> {
        Ok(())
    }

    fn release(&self, _id: u32) {}
}

/// Keep-alive that only records acquisition and release in the log.
///
/// Used by the headless server, where the service manager keeps the process
/// alive anyway but operators still want to see the slot's lifetime.
pub struct LoggingKeepAlive;

impl KeepAlive for LoggingKeepAlive {
    fn acquire(&self, id: u32) -> Result<(), KeepAliveError> {
        log::info!("[KeepAlive] Slot {} acquired", id);
        Ok(())
    }

    fn release(&self, id: u32) {
        log::info!("[KeepAlive] Slot {} released", id);
    }
}

/// RAII guard that releases a keep-alive slot when dropped.
pub struct KeepAliveGuard {
    id: u32,
    keep_alive: Arc<dyn KeepAlive>,
}

impl KeepAliveGuard {
    /// Acquires slot `id`, returning a guard that releases it on drop.
    pub fn acquire(keep_alive: Arc<dyn KeepAlive>, id: u32) -> Result<Self, KeepAliveError> {
        keep_alive.acquire(id)?;
        Ok(Self { id, keep_alive })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.keep_alive.release(self.id);
    }
}
