//! Task spawning abstraction.
//!
//! Core services spawn their background work (route replay, update
//! forwarding) through [`TaskSpawner`] so that the provider callback thread,
//! the host's command thread and the runtime driving the tasks can all differ.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Spawned tasks are detached; they end on their own when the stream or
/// cancellation token they watch is closed.
pub trait TaskSpawner: Send + Sync {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
///
/// Holds a runtime handle, so it can spawn from threads that are not
/// themselves inside the runtime (provider callbacks, signal handlers).
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a spawner bound to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
