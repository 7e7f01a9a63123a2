//! ClientWriter task
//!
//! Drains one session's outbound queue onto its socket. The hub is the only
//! producer for the queue; when the hub drops the session the queue closes
//! and the writer finishes.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{AppError, FaultReporter};
use crate::message::{write_packet, Message};

/// Writer half of a logged-in connection
pub struct ClientWriter<W> {
    userid: String,
    outbound: mpsc::Receiver<Message>,
    sink: W,
    faults: FaultReporter,
}

impl<W> ClientWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        userid: String,
        outbound: mpsc::Receiver<Message>,
        sink: W,
        faults: FaultReporter,
    ) -> Self {
        Self {
            userid,
            outbound,
            sink,
            faults,
        }
    }

    /// Write every queued message until the queue closes
    ///
    /// Messages attributed to this session's own userid are discarded.
    /// A failed write ends the task with `AppError::Write`.
    pub async fn run(mut self) -> Result<(), AppError> {
        debug!("ClientWriter started for {}", self.userid);

        while let Some(msg) = self.outbound.recv().await {
            if msg.sender == self.userid {
                continue;
            }

            if let Err(source) = write_packet(&mut self.sink, &msg.to_packet()).await {
                let err = AppError::Write {
                    userid: self.userid.clone(),
                    source,
                };
                error!("{}", err);
                self.faults.report(&err);
                return Err(err);
            }
        }

        debug!("ClientWriter leaving ({})", self.userid);
        let _ = self.sink.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::BufReader;
    use tokio::time::timeout;

    use super::*;
    use crate::config::FaultPolicy;
    use crate::message::{read_packet, Packet};
    use crate::types::SessionId;

    #[tokio::test]
    async fn test_writer_suppresses_self_echo() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, peer) = tokio::io::duplex(4096);
        let writer = ClientWriter::new("alice".to_string(), rx, sink, FaultReporter::isolated());
        let task = tokio::spawn(writer.run());

        let me = SessionId::new();
        tx.send(Message::from_session(me, "alice", "mine")).await.unwrap();
        tx.send(Message::from_session(SessionId::new(), "bob", "hi")).await.unwrap();
        tx.send(Message::system("notice")).await.unwrap();
        drop(tx);

        let mut reader = BufReader::new(peer);
        assert_eq!(
            read_packet(&mut reader).await.unwrap(),
            Some(Packet::msg("bob", "hi"))
        );
        assert_eq!(
            read_packet(&mut reader).await.unwrap(),
            Some(Packet::msg("system", "notice"))
        );
        assert_eq!(read_packet(&mut reader).await.unwrap(), None);

        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_writer_exits_when_queue_closes() {
        let (tx, rx) = mpsc::channel::<Message>(1);
        let (sink, _peer) = tokio::io::duplex(64);
        let task = tokio::spawn(
            ClientWriter::new("bob".to_string(), rx, sink, FaultReporter::isolated()).run(),
        );

        drop(tx);
        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_ends_only_this_writer() {
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let (tx, rx) = mpsc::channel(1);
        let (sink, peer) = tokio::io::duplex(64);
        drop(peer);

        let faults = FaultReporter::new(FaultPolicy::Isolate, fatal_tx);
        let task = tokio::spawn(ClientWriter::new("bob".to_string(), rx, sink, faults).run());

        tx.send(Message::system("lost")).await.unwrap();
        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(AppError::Write { .. })));
        assert!(fatal_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_escalates_in_strict_mode() {
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let (tx, rx) = mpsc::channel(1);
        let (sink, peer) = tokio::io::duplex(64);
        drop(peer);

        let faults = FaultReporter::new(FaultPolicy::Strict, fatal_tx);
        let task = tokio::spawn(ClientWriter::new("bob".to_string(), rx, sink, faults).run());

        tx.send(Message::system("lost")).await.unwrap();
        let _ = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(matches!(fatal_rx.try_recv(), Ok(AppError::Fatal(_))));
    }
}
