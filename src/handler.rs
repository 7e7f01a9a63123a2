//! Connection handler
//!
//! One [`ConnectionReader`] runs per accepted connection. It parses inbound
//! packets, claims a userid through the hub, starts the paired
//! [`ClientWriter`] once the claim is accepted, and turns chat traffic into
//! hub events.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, FaultReporter};
use crate::hub::{HubHandle, JoinOutcome, LeaveNotice};
use crate::message::{read_packet, write_packet, Action, Message, Packet};
use crate::types::{SessionId, ANONYMOUS_USERID};
use crate::writer::ClientWriter;

const JOINED_NOTICE: &str = "Entered chat";
const LEFT_NOTICE: &str = "Left chat";
const DISCONNECTED_NOTICE: &str = "Disconnected";
const EMPTY_USERID_NOTICE: &str = "userid must not be empty";

/// Everything a connection needs from the server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub hub: HubHandle,
    pub faults: FaultReporter,
    pub max_read_retries: u32,
    pub read_retry_delay: Duration,
}

impl ConnectionContext {
    pub fn new(hub: HubHandle, faults: FaultReporter, config: &ServerConfig) -> Self {
        Self {
            hub,
            faults,
            max_read_retries: config.max_read_retries,
            read_retry_delay: config.read_retry_delay,
        }
    }
}

/// Handle a new TCP connection
///
/// Splits the stream and runs a [`ConnectionReader`] until the client
/// quits, disconnects, or faults.
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) -> Result<(), AppError> {
    let peer = stream.peer_addr()?;
    info!("Handling connection from {}", peer);

    let (read_half, write_half) = stream.into_split();
    ConnectionReader::new(SessionId::new(), peer, read_half, write_half, ctx)
        .run()
        .await
}

/// Emits exactly one leaving event for a logged-in session
///
/// Dropping the guard without calling [`LeaveGuard::leave`] (early return,
/// error, panic unwinding) still queues the event.
struct LeaveGuard {
    hub: HubHandle,
    notice: Option<LeaveNotice>,
}

impl LeaveGuard {
    fn new(hub: HubHandle, notice: LeaveNotice) -> Self {
        Self {
            hub,
            notice: Some(notice),
        }
    }

    async fn leave(mut self) {
        if let Some(notice) = self.notice.take() {
            if self.hub.leave(notice).await.is_err() {
                debug!("Hub closed before leave was delivered");
            }
        }
    }
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        if let Some(notice) = self.notice.take() {
            self.hub.try_leave(notice);
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

enum Inbound {
    Packet(Result<Option<Packet>, AppError>),
    WriterDone(Result<Result<(), AppError>, JoinError>),
    Evicted,
}

/// Reader half of a connection and its per-client state machine
pub struct ConnectionReader<R, W> {
    session_id: SessionId,
    peer: SocketAddr,
    reader: BufReader<R>,
    /// Write half, held until LOGIN is accepted and then moved to the writer
    sink: Option<W>,
    userid: Option<String>,
    writer_task: Option<JoinHandle<Result<(), AppError>>>,
    /// Resolves when the hub drops this connection's registry entry
    evicted: Option<oneshot::Receiver<()>>,
    guard: Option<LeaveGuard>,
    ctx: ConnectionContext,
}

impl<R, W> ConnectionReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        session_id: SessionId,
        peer: SocketAddr,
        reader: R,
        sink: W,
        ctx: ConnectionContext,
    ) -> Self {
        Self {
            session_id,
            peer,
            reader: BufReader::new(reader),
            sink: Some(sink),
            userid: None,
            writer_task: None,
            evicted: None,
            guard: None,
            ctx,
        }
    }

    /// Read packets until the connection ends
    ///
    /// Every exit after an accepted LOGIN emits one leaving event.
    pub async fn run(mut self) -> Result<(), AppError> {
        let result = self.read_loop().await;

        if let Some(guard) = self.guard.take() {
            guard.leave().await;
        }
        debug!("ConnectionReader for {} ({}) finished", self.display_name(), self.peer);

        result
    }

    async fn read_loop(&mut self) -> Result<(), AppError> {
        let mut failures = 0u32;

        loop {
            let inbound = match (self.writer_task.as_mut(), self.evicted.as_mut()) {
                (Some(task), Some(evicted)) => tokio::select! {
                    biased;
                    _ = evicted => Inbound::Evicted,
                    joined = task => Inbound::WriterDone(joined),
                    packet = read_packet(&mut self.reader) => Inbound::Packet(packet),
                },
                _ => Inbound::Packet(read_packet(&mut self.reader).await),
            };

            match inbound {
                Inbound::WriterDone(joined) => {
                    self.writer_task = None;
                    return self.writer_finished(joined);
                }
                Inbound::Evicted => return self.close_evicted().await,
                Inbound::Packet(Ok(Some(packet))) => {
                    failures = 0;
                    if let Flow::Stop = self.handle_packet(packet).await? {
                        return Ok(());
                    }
                }
                Inbound::Packet(Ok(None)) => {
                    info!("User {} has unexpectedly disconnected", self.display_name());
                    if self.userid.is_some() {
                        self.announce(DISCONNECTED_NOTICE).await?;
                    }
                    return Ok(());
                }
                Inbound::Packet(Err(AppError::Io(e)))
                    if is_transient(&e) && failures < self.ctx.max_read_retries =>
                {
                    failures += 1;
                    warn!(
                        "Read error for {} (attempt {}): {}",
                        self.display_name(),
                        failures,
                        e
                    );
                    tokio::time::sleep(self.ctx.read_retry_delay).await;
                }
                Inbound::Packet(Err(err)) => {
                    warn!("Dropping connection for {}: {}", self.display_name(), err);
                    self.ctx.faults.report(&err);
                    return Err(err);
                }
            }
        }
    }

    fn writer_finished(
        &self,
        joined: Result<Result<(), AppError>, JoinError>,
    ) -> Result<(), AppError> {
        match joined {
            Ok(Ok(())) => {
                info!("Writer for {} ended, closing connection", self.display_name());
                Ok(())
            }
            Ok(Err(err)) => {
                warn!("Writer for {} failed, closing connection: {}", self.display_name(), err);
                Err(err)
            }
            Err(err) => {
                warn!("Writer task for {} died: {}", self.display_name(), err);
                Err(AppError::Task(err))
            }
        }
    }

    /// Stop the writer, which may be stuck on a socket nobody reads, and end
    async fn close_evicted(&mut self) -> Result<(), AppError> {
        self.evicted = None;
        if let Some(task) = self.writer_task.take() {
            task.abort();
            // A writer that already failed explains the eviction better
            if let Ok(Err(err)) = task.await {
                return Err(err);
            }
        }

        info!("{} was removed by the server, closing connection", self.display_name());
        Err(AppError::Evicted(self.display_name().to_string()))
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<Flow, AppError> {
        match packet.action {
            Action::Login => self.handle_login(packet.userid).await,
            Action::Msg => {
                let msg = Message::from_session(self.session_id, self.display_name(), packet.data);
                self.ctx.hub.broadcast(msg).await?;
                Ok(Flow::Continue)
            }
            Action::Quit => {
                self.announce(LEFT_NOTICE).await?;
                Ok(Flow::Stop)
            }
            Action::Unknown => {
                warn!("Ignoring packet with unknown action from {}", self.display_name());
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_login(&mut self, userid: String) -> Result<Flow, AppError> {
        let Some(mut sink) = self.sink.take() else {
            warn!(
                "{} sent a second LOGIN (as {}), ignoring",
                self.display_name(),
                userid
            );
            return Ok(Flow::Continue);
        };

        if userid.trim().is_empty() {
            write_packet(&mut sink, &Message::system(EMPTY_USERID_NOTICE).to_packet()).await?;
            self.sink = Some(sink);
            return Ok(Flow::Continue);
        }

        let outcome = self
            .ctx
            .hub
            .enter(self.session_id, userid.clone(), self.peer)
            .await?;

        match outcome {
            JoinOutcome::Accepted { outbound, evicted } => {
                info!("{} logged in from {}", userid, self.peer);
                let writer = ClientWriter::new(userid.clone(), outbound, sink, self.ctx.faults.clone());
                self.writer_task = Some(tokio::spawn(writer.run()));
                self.evicted = Some(evicted);
                self.guard = Some(LeaveGuard::new(
                    self.ctx.hub.clone(),
                    LeaveNotice {
                        session_id: self.session_id,
                        userid: userid.clone(),
                    },
                ));
                self.userid = Some(userid);

                self.announce(format!("{} ({})", JOINED_NOTICE, self.peer)).await?;
                Ok(Flow::Continue)
            }
            JoinOutcome::Rejected => {
                let err = AppError::DuplicateLogin(userid);
                write_packet(&mut sink, &Message::system(err.to_string()).to_packet()).await?;
                Err(err)
            }
        }
    }

    /// Broadcast a notice attributed to this connection
    async fn announce(&self, text: impl Into<String>) -> Result<(), AppError> {
        let msg = Message::from_session(self.session_id, self.display_name(), text);
        self.ctx.hub.broadcast(msg).await
    }

    fn display_name(&self) -> &str {
        self.userid.as_deref().unwrap_or(ANONYMOUS_USERID)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
