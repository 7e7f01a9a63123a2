//! Chat server acceptor
//!
//! Binds the listener, starts the broadcast hub, and spawns one connection
//! handler per accepted stream.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, FaultReporter};
use crate::handler::{handle_connection, ConnectionContext};
use crate::hub::{BroadcastHub, HubHandle};

/// The chat server
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    hub: BroadcastHub,
    handle: HubHandle,
}

impl ChatServer {
    /// Bind the configured address
    pub async fn bind(config: ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(&config.addr).await?;
        let (hub, handle) = BroadcastHub::new(&config);
        Ok(Self {
            listener,
            config,
            hub,
            handle,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for querying the hub from outside the server
    pub fn hub_handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// In strict mode a connection fault stops the loop and is returned as
    /// `AppError::Fatal`.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer {
            listener,
            config,
            hub,
            handle,
        } = self;
        tokio::pin!(shutdown);

        tokio::spawn(hub.run());
        info!("Chat server started on {}", listener.local_addr()?);

        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let ctx = ConnectionContext::new(
            handle,
            FaultReporter::new(config.fault_policy, fatal_tx),
            &config,
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Chat server shutting down");
                    return Ok(());
                }
                Some(fatal) = fatal_rx.recv() => {
                    error!("Server is stopping: {}", fatal);
                    return Err(fatal);
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => spawn_connection(stream, addr, ctx.clone()),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }
    }

    /// Accept connections until Ctrl-C
    pub async fn run(self) -> Result<(), AppError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl-C handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn spawn_connection(stream: TcpStream, addr: SocketAddr, ctx: ConnectionContext) {
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, ctx).await {
            warn!("Connection from {} ended with error: {}", addr, e);
        }
    });
}
