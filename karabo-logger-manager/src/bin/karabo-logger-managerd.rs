//! A thin composition root: wires an [`InProcessBroker`] (the concrete
//! broker binding is out of scope for this crate) to a [`LoggerManager`]
//! and keeps it alive until interrupted. There is no production broker
//! binding shipped here, so this is demo/reference tooling rather than a
//! deployable server.

use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use karabo_logger_manager::{Config, LoggerManager};
use karabo_net::{BrokerDriver, InProcessBroker, SignalSlotable};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "karabo-logger-manager.toml".to_string());
    let config = Config::load(&config_path);
    info!(config_path, "loaded logger-manager configuration");

    let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
    let owner = SignalSlotable::new("karabo-logger-manager-1", "DataLoggerManager", broker, karabo_net::Config::default());
    owner.start().await.expect("failed to start logger-manager's SignalSlotable");

    let manager = LoggerManager::new(owner, config).expect("failed to load logger-manager persisted state");
    manager.start();

    info!("karabo-logger-managerd running, waiting for shutdown signal");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, exiting");
}
