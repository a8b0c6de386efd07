//! Graceful shutdown coordinator
//!
//! A single broadcast fan-out of [`ShutdownSignal`]. The dispatcher and the
//! HTTP server each hold a receiver; OS signals feed the coordinator.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Stop accepting, drain in-flight work within the grace period
    Graceful,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
}

pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: RwLock::new(ShutdownState::Running),
            shutdown_tx,
            grace_period,
        }
    }

    /// How long components may take to drain after a graceful signal
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast `signal`. Only the first call has any effect; returns
    /// whether this call initiated the shutdown.
    pub fn shutdown(&self, signal: ShutdownSignal) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state == ShutdownState::ShuttingDown {
                warn!("Shutdown already in progress");
                return false;
            }
            *state = ShutdownState::ShuttingDown;
        }

        info!(?signal, grace_period = ?self.grace_period, "Initiating shutdown");
        // No receivers just means nothing is left to notify
        let _ = self.shutdown_tx.send(signal);
        true
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state() == ShutdownState::ShuttingDown
    }

    /// Resolve once shutdown has been initiated, including before this call
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        if self.is_shutting_down() {
            return;
        }
        let _ = rx.recv().await;
    }
}

/// Trigger a graceful shutdown on SIGINT or SIGTERM
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown(ShutdownSignal::Graceful);
    });

    Ok(())
}

#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                coordinator.shutdown(ShutdownSignal::Graceful);
            }
            Err(e) => warn!("Ctrl+C handler failed: {}", e),
        }
    });

    Ok(())
}
