//! TCP listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use ferriq_common::Signal;
use ferriq_queue::QueueManager;

use crate::session::Session;

/// Accept loop: one session task per connection, all observing the
/// process-wide shutdown channel.
pub struct Server {
    addr: SocketAddr,
    manager: Arc<QueueManager>,
    shutdown: broadcast::Sender<Signal>,
}

impl Server {
    pub const fn new(
        addr: SocketAddr,
        manager: Arc<QueueManager>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Self {
        Self {
            addr,
            manager,
            shutdown,
        }
    }

    /// Accept connections until shutdown.
    ///
    /// # Errors
    /// If the listening socket cannot be bound.
    pub async fn serve(&self) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(address = %self.addr, "listening");

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "client connected");
                            let session = Session::new(Arc::clone(&self.manager));
                            let session_shutdown = self.shutdown.subscribe();
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = session.run(reader, writer, session_shutdown).await {
                                    debug!(%peer, error = %e, "session ended with error");
                                }
                                debug!(%peer, "client disconnected");
                            });
                        }
                        Err(e) => warn!(error = %e, "could not accept connection"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("stopped accepting connections");
        Ok(())
    }
}
