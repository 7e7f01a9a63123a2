//! Line-oriented TCP Chat Server Library
//!
//! Clients connect over TCP, log in with a bare userid, and exchange
//! newline-delimited JSON packets that are fanned out to every other
//! logged-in client.
//!
//! # Architecture
//! Uses the Actor pattern with bounded `mpsc` channels:
//! - `BroadcastHub` is the single task that owns the registry of sessions
//! - Each connection has a `ConnectionReader` task feeding the hub
//! - Each logged-in client has a `ClientWriter` task draining its queue
//! - No locks needed - all registry access goes through message passing
//!
//! # Example
//! ```ignore
//! use linechat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), linechat::AppError> {
//!     let server = ChatServer::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod server;
pub mod session;
pub mod types;
pub mod writer;

// Re-export main types for convenience
pub use config::{FanoutPolicy, FaultPolicy, ServerConfig};
pub use error::{AppError, FaultReporter, SendError};
pub use handler::{handle_connection, ConnectionContext, ConnectionReader};
pub use hub::{BroadcastHub, HubHandle, JoinOutcome, LeaveNotice};
pub use message::{Action, Message, Origin, Packet};
pub use server::ChatServer;
pub use session::Session;
pub use types::SessionId;
pub use writer::ClientWriter;
