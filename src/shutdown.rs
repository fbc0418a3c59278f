//! Graceful shutdown coordination utilities.
//!
//! Provides a lightweight [`ShutdownCoordinator`] that can be shared across
//! tasks to detect Ctrl+C and request early termination without publishing
//! partially aggregated results.
//!
//! Coordinators form a tree: [`ShutdownCoordinator::child`] returns a handle that
//! observes its parent's shutdown but can also be triggered on its own. A run
//! uses a child to carry its abort signal without cancelling the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<ShutdownCoordinator>>>,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Create a coordinator that shuts down when this one does.
    ///
    /// Requesting shutdown on the child does not affect the parent.
    pub fn child(self: &Arc<Self>) -> SharedShutdown {
        let child = Self::shared();
        {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // Registered first, so a concurrent request either reaches the child
        // through the list or is visible here.
        if self.is_shutdown_requested() {
            child.request_shutdown();
        }
        child
    }

    /// Request shutdown. Notifies all registered waiters exactly once and
    /// propagates to every live child.
    pub fn request_shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children: Vec<_> = {
            let mut guard = self.children.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.request_shutdown();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before reading the flag so a request landing in
        // between is not lost.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
