//! Shared server state

use chatcast_core::chat::{DispatcherHandle, MessageStore};
use chatcast_core::config::ServerConfig;
use chatcast_core::health::HealthChecker;
use chatcast_core::metrics::ChatMetrics;
use chatcast_core::shutdown::ShutdownCoordinator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Everything a request or socket task needs; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub dispatcher: DispatcherHandle,
    /// Read-only access for the HTTP surface; writes go through the dispatcher
    pub store: Arc<dyn MessageStore>,
    pub metrics: Arc<ChatMetrics>,
    pub health: HealthChecker,
    pub shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        dispatcher: DispatcherHandle,
        store: Arc<dyn MessageStore>,
        metrics: Arc<ChatMetrics>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
            store,
            metrics,
            health: HealthChecker::new(),
            shutdown,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve a connection slot, or `None` at capacity
    pub fn try_reserve_connection(&self) -> Option<ConnectionGuard> {
        let prev = self.connections.fetch_add(1, Ordering::SeqCst);
        if prev >= self.config.max_connections {
            self.connections.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(ConnectionGuard {
            connections: self.connections.clone(),
        })
    }

    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Releases its connection slot when dropped
pub struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }
}
