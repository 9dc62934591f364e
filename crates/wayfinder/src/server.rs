//! `WayfinderServer` builder and accept loop.
//!
//! Ties the layers together: the transport accepts device sockets, the
//! handler performs the ready handshake against the authenticator, and
//! everything session-shaped lands in the mediator nexus.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use wayfinder_room::SiteDirectory;
use wayfinder_session::{Authenticator, MediatorNexus};
use wayfinder_transport::WebSocketTransport;

use crate::feed::{run_feed, EventFeed};
use crate::handler::handle_connection;
use crate::{WayfinderConfig, WayfinderError};

/// Shared state passed to each connection handler task.
pub(crate) struct ServerState<D, A> {
    pub(crate) nexus: Arc<MediatorNexus<D>>,
    pub(crate) auth: A,
    pub(crate) handshake_timeout: Duration,
}

/// Builder for configuring and starting a Wayfinder server.
pub struct WayfinderServerBuilder {
    config: WayfinderConfig,
}

impl WayfinderServerBuilder {
    pub fn new() -> Self {
        Self {
            config: WayfinderConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: WayfinderConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the device-facing listener to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Binds the listener and assembles the server around the given
    /// room directory and authenticator.
    pub async fn build<D: SiteDirectory, A: Authenticator>(
        self,
        directory: Arc<D>,
        auth: A,
    ) -> Result<WayfinderServer<D, A>, WayfinderError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let nexus = MediatorNexus::new(
            directory,
            self.config.room_settings(),
            self.config.nexus_settings(),
        );
        Ok(WayfinderServer {
            transport,
            state: Arc::new(ServerState {
                nexus,
                auth,
                handshake_timeout: self.config.handshake_timeout,
            }),
        })
    }
}

impl Default for WayfinderServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Wayfinder server.
pub struct WayfinderServer<D, A> {
    transport: WebSocketTransport,
    state: Arc<ServerState<D, A>>,
}

impl<D: SiteDirectory, A: Authenticator> WayfinderServer<D, A> {
    pub fn builder() -> WayfinderServerBuilder {
        WayfinderServerBuilder::new()
    }

    /// The local address the device listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The session coordinator, for out-of-band integration (event
    /// feeds, admin tooling).
    pub fn nexus(&self) -> Arc<MediatorNexus<D>> {
        Arc::clone(&self.state.nexus)
    }

    /// Spawns a consumer that applies external identity and location
    /// events to live sessions.
    pub fn attach_feed<F: EventFeed>(&self, feed: F) -> JoinHandle<()> {
        let nexus = self.nexus();
        tokio::spawn(run_feed(nexus, feed))
    }

    /// Runs the accept loop until the process is terminated. Each
    /// accepted device socket gets its own handler task.
    pub async fn run(mut self) -> Result<(), WayfinderError> {
        tracing::info!(
            addr = %self.transport.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "wayfinder server running"
        );
        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
