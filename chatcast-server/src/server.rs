//! HTTP/WebSocket server

use anyhow::{Context, Result};
use axum::Router;
use chatcast_core::chat::{open_store, ChatBroadcastService, ChatDispatcher, EphemeralRelay, MessageStore};
use chatcast_core::config::Config;
use chatcast_core::metrics::ChatMetrics;
use chatcast_core::shutdown::{ShutdownCoordinator, ShutdownSignal};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::api::build_router;
use super::state::AppState;

/// A running chat engine plus the HTTP surface in front of it
pub struct ChatServer {
    state: AppState,
    bind_address: SocketAddr,
    dispatcher_task: JoinHandle<()>,
}

impl ChatServer {
    /// Start the dispatcher over an already-open store
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &Config, store: Arc<dyn MessageStore>, shutdown: Arc<ShutdownCoordinator>) -> Self {
        let metrics = Arc::new(ChatMetrics::new());
        let service = ChatBroadcastService::with_metrics(
            store.clone(),
            EphemeralRelay::new(&config.chat.relay_routes),
            metrics.clone(),
        );
        let (dispatcher, dispatcher_task) = ChatDispatcher::spawn(
            service,
            config.chat.dispatcher_capacity,
            config.chat.max_pending_per_connection,
            shutdown.subscribe(),
        );

        let state = AppState::new(config.server.clone(), dispatcher, store, metrics, shutdown);
        Self {
            state,
            bind_address: config.server.bind_address,
            dispatcher_task,
        }
    }

    /// Open the configured store, then [`ChatServer::new`]
    pub fn from_config(config: &Config, shutdown: Arc<ShutdownCoordinator>) -> Result<Self> {
        let store = open_store(&config.store)
            .with_context(|| format!("failed to open {:?} message store", config.store.backend))?;
        Ok(Self::new(config, store, shutdown))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_address)
            .await
            .with_context(|| format!("failed to bind {}", self.bind_address))?;
        self.serve(listener).await
    }

    /// Serve on `listener` until the shutdown coordinator fires, then give the
    /// dispatcher the grace period to stop
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("chatcast listening on {}", listener.local_addr()?);

        let shutdown = self.state.shutdown.clone();
        let signal = shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
            .await
            .context("server error")?;

        shutdown.shutdown(ShutdownSignal::Graceful);
        let grace = shutdown.grace_period();
        if tokio::time::timeout(grace, self.dispatcher_task).await.is_err() {
            warn!(?grace, "Dispatcher did not stop within the grace period");
        }

        info!("chatcast stopped");
        Ok(())
    }
}
