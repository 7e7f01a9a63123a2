//! BroadcastHub actor implementation
//!
//! The single task that owns the registry of logged-in sessions. Connection
//! readers talk to it through a [`HubHandle`]; every membership change and
//! every fan-out decision is applied here, one event at a time, so the
//! registry needs no lock.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{FanoutPolicy, ServerConfig};
use crate::error::{AppError, SendError};
use crate::message::Message;
use crate::session::Session;
use crate::types::SessionId;

/// Request to claim a userid and enter the chat
#[derive(Debug)]
pub struct JoinRequest {
    pub session_id: SessionId,
    pub userid: String,
    pub peer: SocketAddr,
    pub reply: oneshot::Sender<JoinOutcome>,
}

/// Hub's answer to a [`JoinRequest`]
#[derive(Debug)]
pub enum JoinOutcome {
    /// Registered
    Accepted {
        /// The session's outbound queue
        outbound: mpsc::Receiver<Message>,
        /// Resolves once the hub drops the registry entry
        evicted: oneshot::Receiver<()>,
    },
    /// The userid is already registered to another connection
    Rejected,
}

/// A session leaving the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveNotice {
    pub session_id: SessionId,
    pub userid: String,
}

/// Read-only questions answered by the hub task itself
#[derive(Debug)]
pub enum HubQuery {
    /// Sorted list of registered userids
    Roster(oneshot::Sender<Vec<String>>),
}

/// Cloneable handle for sending events to the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    broadcast_tx: mpsc::Sender<Message>,
    entering_tx: mpsc::Sender<JoinRequest>,
    leaving_tx: mpsc::Sender<LeaveNotice>,
    query_tx: mpsc::Sender<HubQuery>,
}

impl HubHandle {
    /// Queue a message for fan-out
    pub async fn broadcast(&self, msg: Message) -> Result<(), AppError> {
        self.broadcast_tx.send(msg).await?;
        Ok(())
    }

    /// Claim `userid` for a connection and wait for the hub's decision
    pub async fn enter(
        &self,
        session_id: SessionId,
        userid: String,
        peer: SocketAddr,
    ) -> Result<JoinOutcome, AppError> {
        let (reply, outcome) = oneshot::channel();
        self.entering_tx
            .send(JoinRequest {
                session_id,
                userid,
                peer,
                reply,
            })
            .await?;
        outcome.await.map_err(|_| AppError::ChannelSend)
    }

    /// Queue a leaving event
    pub async fn leave(&self, notice: LeaveNotice) -> Result<(), AppError> {
        self.leaving_tx.send(notice).await?;
        Ok(())
    }

    /// Queue a leaving event from a context that cannot await
    ///
    /// Falls back to a spawned send when the queue is full.
    pub fn try_leave(&self, notice: LeaveNotice) {
        match self.leaving_tx.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(notice)) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!("No runtime to deliver leave for {}", notice.userid);
                    return;
                };
                let leaving_tx = self.leaving_tx.clone();
                runtime.spawn(async move {
                    let _ = leaving_tx.send(notice).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                debug!("Hub closed, dropping leave for {}", notice.userid);
            }
        }
    }

    /// Userids currently registered
    pub async fn roster(&self) -> Result<Vec<String>, AppError> {
        let (reply, roster) = oneshot::channel();
        self.query_tx.send(HubQuery::Roster(reply)).await?;
        roster.await.map_err(|_| AppError::ChannelSend)
    }
}

/// The broadcast hub actor
///
/// Selects among its input queues with no priority between them; order is
/// FIFO only within a single queue.
pub struct BroadcastHub {
    /// Logged-in sessions: userid -> Session
    registry: HashMap<String, Session>,
    /// Capacity for newly created outbound queues
    queue_capacity: usize,
    /// Handling of full recipient queues
    fanout_policy: FanoutPolicy,
    broadcast_rx: mpsc::Receiver<Message>,
    entering_rx: mpsc::Receiver<JoinRequest>,
    leaving_rx: mpsc::Receiver<LeaveNotice>,
    query_rx: mpsc::Receiver<HubQuery>,
}

impl BroadcastHub {
    /// Create a hub and the handle used to reach it
    pub fn new(config: &ServerConfig) -> (Self, HubHandle) {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.event_capacity);
        let (entering_tx, entering_rx) = mpsc::channel(config.event_capacity);
        let (leaving_tx, leaving_rx) = mpsc::channel(config.event_capacity);
        let (query_tx, query_rx) = mpsc::channel(config.event_capacity);

        let hub = Self {
            registry: HashMap::new(),
            queue_capacity: config.queue_capacity,
            fanout_policy: config.fanout_policy,
            broadcast_rx,
            entering_rx,
            leaving_rx,
            query_rx,
        };
        let handle = HubHandle {
            broadcast_tx,
            entering_tx,
            leaving_tx,
            query_tx,
        };
        (hub, handle)
    }

    /// Run the hub event loop
    ///
    /// Processes events until every handle has been dropped.
    pub async fn run(mut self) {
        info!("BroadcastHub running");

        loop {
            tokio::select! {
                Some(msg) = self.broadcast_rx.recv() => self.handle_broadcast(msg).await,
                Some(request) = self.entering_rx.recv() => self.handle_entering(request).await,
                Some(notice) = self.leaving_rx.recv() => self.handle_leaving(notice),
                Some(query) = self.query_rx.recv() => self.handle_query(query),
                else => break,
            }
        }

        info!("BroadcastHub shutting down");
    }

    /// Fan a message out to every registered session except its producer
    async fn handle_broadcast(&mut self, msg: Message) {
        debug!("Broadcasting from {} to {} sessions", msg.sender, self.registry.len());

        let mut stale = Vec::new();
        for session in self.registry.values() {
            if msg.is_from(session.id) {
                continue;
            }

            let result = match self.fanout_policy {
                FanoutPolicy::Block => session.send(msg.clone()).await,
                FanoutPolicy::DropNewest | FanoutPolicy::Disconnect => {
                    session.try_send(msg.clone())
                }
            };

            match result {
                Ok(()) => {}
                Err(SendError::ChannelClosed) => {
                    debug!("Outbound queue for {} already closed", session.userid);
                    stale.push(session.userid.clone());
                }
                Err(SendError::QueueFull) => match self.fanout_policy {
                    FanoutPolicy::Disconnect => {
                        warn!(
                            "Disconnecting {} ({}): outbound queue full",
                            session.userid, session.peer
                        );
                        stale.push(session.userid.clone());
                    }
                    _ => {
                        warn!("Dropped message from {} for {}: queue full", msg.sender, session.userid);
                    }
                },
            }
        }

        for userid in stale {
            if let Some(session) = self.registry.remove(&userid) {
                info!("Removed {} ({}) from registry", userid, session.peer);
                session.evict();
            }
        }
    }

    /// Claim a userid and register the session in one step
    async fn handle_entering(&mut self, request: JoinRequest) {
        let JoinRequest {
            session_id,
            userid,
            peer,
            reply,
        } = request;

        if self.registry.contains_key(&userid) {
            warn!("Rejected duplicate login for {} from {}", userid, peer);
            let _ = reply.send(JoinOutcome::Rejected);
            let notice = AppError::DuplicateLogin(userid).to_string();
            self.handle_broadcast(Message::system(notice)).await;
            return;
        }

        let (outbound_tx, outbound) = mpsc::channel(self.queue_capacity);
        let (evicted_tx, evicted) = oneshot::channel();
        let session = Session::new(session_id, userid.clone(), peer, outbound_tx, evicted_tx);
        self.registry.insert(userid.clone(), session);

        if reply.send(JoinOutcome::Accepted { outbound, evicted }).is_err() {
            // Requester vanished before it could start a writer
            self.registry.remove(&userid);
            debug!("Join for {} abandoned", userid);
            return;
        }

        info!("{} entered from {} ({} online)", userid, peer, self.registry.len());
    }

    /// Remove a session, closing its outbound queue
    fn handle_leaving(&mut self, notice: LeaveNotice) {
        let owned = self
            .registry
            .get(&notice.userid)
            .is_some_and(|session| session.id == notice.session_id);

        if owned {
            self.registry.remove(&notice.userid);
            info!("{} left ({} online)", notice.userid, self.registry.len());
        } else {
            debug!("Leave for unregistered session {} ignored", notice.userid);
        }
    }

    fn handle_query(&self, query: HubQuery) {
        match query {
            HubQuery::Roster(reply) => {
                let mut roster: Vec<String> = self.registry.keys().cloned().collect();
                roster.sort();
                let _ = reply.send(roster);
            }
        }
    }
}
