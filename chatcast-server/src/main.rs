use anyhow::{Context, Result};
use chatcast_core::config::{Config, StoreBackend};
use chatcast_core::logging::{init_logging_with_config, LogConfig};
use chatcast_core::metrics::init_metrics;
use chatcast_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use chatcast_server::ChatServer;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chatcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; CHATCAST_* variables override it
    #[arg(short, long, env = "CHATCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Keep history in memory only
    #[arg(long)]
    memory: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        if self.memory {
            config.store.backend = StoreBackend::Memory;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    init_metrics();

    info!(
        bind = %config.server.bind_address,
        store = ?config.store.backend,
        "chatcast starting"
    );

    let shutdown = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
    install_signal_handlers(shutdown.clone()).context("failed to install signal handlers")?;

    ChatServer::from_config(&config, shutdown)?.run().await
}
