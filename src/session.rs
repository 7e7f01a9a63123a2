//! Session struct definition
//!
//! The hub's registry entry for a logged-in connection: identity plus the
//! producer end of its outbound queue. The socket itself stays with the
//! connection's reader and writer tasks.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use crate::error::SendError;
use crate::message::Message;
use crate::types::SessionId;

/// Logged-in client information
///
/// Only the broadcast hub holds a `Session`. Dropping it drops the last
/// sender of the outbound queue, which closes the queue and lets the
/// paired writer task finish. It also resolves the connection's eviction
/// signal, so a reader whose writer is stuck on a dead socket still stops.
#[derive(Debug)]
pub struct Session {
    /// Identifier of the underlying connection
    pub id: SessionId,
    /// Userid claimed at LOGIN, immutable afterwards
    pub userid: String,
    /// Remote address of the connection
    pub peer: SocketAddr,
    /// Hub → ClientWriter message channel
    outbound: mpsc::Sender<Message>,
    /// Fires (or closes) when the hub removes this entry
    evicted: oneshot::Sender<()>,
}

impl Session {
    /// Create a new session bound to the given outbound sender
    pub fn new(
        id: SessionId,
        userid: String,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
        evicted: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            userid,
            peer,
            outbound,
            evicted,
        }
    }

    /// Enqueue a message, waiting for room if the queue is full
    ///
    /// Returns an error if the channel is closed (writer gone).
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Enqueue a message without waiting
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Drop the entry and tell its connection to close
    pub fn evict(self) {
        // The reader may already be gone
        let _ = self.evicted.send(());
    }
}
