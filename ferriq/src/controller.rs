//! Top-level assembly: store, flusher, manager, listener, shutdown.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use ferriq_common::Signal;
use ferriq_queue::QueueManager;
use ferriq_server::Server;
use ferriq_store::{Database, WriteBehind};

use crate::config::BrokerConfig;

/// The broker process. Owns the database handle and the queue manager
/// and passes explicit handles downward; nothing here is a global.
pub struct Ferriq {
    config: BrokerConfig,
}

impl Ferriq {
    pub const fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Run until SIGINT/SIGTERM, then drain: stop accepting, signal
    /// every waiter, flush the write-behind cache, close the store.
    ///
    /// # Errors
    /// If the store cannot be opened, the listener cannot bind, or the
    /// final flush fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr()?;
        std::fs::create_dir_all(&self.config.database_path)?;
        let db = Database::open(&self.config.database_path, self.config.db_buffer_size)?;
        let store = WriteBehind::new(db);

        let (shutdown, _) = broadcast::channel(64);

        let flusher = tokio::spawn(
            Arc::clone(&store).run(self.config.flush_interval(), shutdown.subscribe()),
        );

        let manager = Arc::new(QueueManager::open(
            Arc::clone(&store),
            self.config.engine_settings(),
            shutdown.clone(),
        )?);
        let server = Server::new(addr, Arc::clone(&manager), shutdown.clone());

        info!("broker running");
        let outcome = tokio::select! {
            result = server.serve() => result.map_err(anyhow::Error::from),
            result = wait_for_signal() => result.map_err(anyhow::Error::from),
        };

        info!("shutting down");
        let _ = shutdown.send(Signal::Shutdown);
        if let Err(e) = flusher.await {
            error!(error = %e, "flusher task failed");
        }
        manager.close()?;
        info!("server stopped");
        outcome
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = terminate.recv() => info!("terminate received"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    Ok(())
}
