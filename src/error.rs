//! Error types for the chat server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::FaultPolicy;

/// Application-level errors
///
/// Every variant is scoped to the connection that produced it unless the
/// server runs in strict mode, where decode and write failures are
/// escalated to a process-wide stop.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on a socket or standard stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A received line is not a well-formed packet
    #[error("Malformed packet: {0}")]
    Decode(#[source] serde_json::Error),

    /// A received line ran past the framing limit without a newline
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Writing to a client socket failed
    #[error("Write to '{userid}' failed: {source}")]
    Write {
        userid: String,
        #[source]
        source: std::io::Error,
    },

    /// The writer task panicked or was cancelled
    #[error("Writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The hub removed the session, e.g. for a stalled outbound queue
    #[error("'{0}' was removed by the server")]
    Evicted(String),

    /// Channel send error (the broadcast hub is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// LOGIN for a userid that is already registered
    #[error("userid {0} is already logged in")]
    DuplicateLogin(String),

    /// The server closed the connection (client role)
    #[error("Chat server has unexpectedly disconnected")]
    ServerClosed,

    /// A connection fault escalated to a process-wide stop (strict mode)
    #[error("Fatal fault: {0}")]
    Fatal(String),
}

impl AppError {
    /// Whether strict mode escalates this error to a process-wide stop
    pub fn is_escalated_in_strict_mode(&self) -> bool {
        matches!(
            self,
            AppError::Decode(_) | AppError::LineTooLong(_) | AppError::Write { .. }
        )
    }
}

impl<T> From<mpsc::error::SendError<T>> for AppError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        AppError::ChannelSend
    }
}

/// Message send errors
///
/// Occurs when delivering to a session's outbound queue fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The queue is at capacity and the caller asked not to wait
    #[error("Queue full")]
    QueueFull,
}

/// Routes connection faults according to the server's [`FaultPolicy`]
///
/// Under `Isolate` a fault only ends the task that hit it. Under `Strict`,
/// decode and write failures are forwarded to the acceptor, which stops
/// the server.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    policy: FaultPolicy,
    fatal_tx: Option<mpsc::Sender<AppError>>,
}

impl FaultReporter {
    pub fn new(policy: FaultPolicy, fatal_tx: mpsc::Sender<AppError>) -> Self {
        Self {
            policy,
            fatal_tx: Some(fatal_tx),
        }
    }

    /// Reporter that never escalates
    pub fn isolated() -> Self {
        Self {
            policy: FaultPolicy::Isolate,
            fatal_tx: None,
        }
    }

    /// Report a fault; returns true if it was escalated
    pub fn report(&self, err: &AppError) -> bool {
        if self.policy != FaultPolicy::Strict || !err.is_escalated_in_strict_mode() {
            return false;
        }
        let Some(fatal_tx) = &self.fatal_tx else {
            return false;
        };

        tracing::error!("Escalating to server stop (strict mode): {}", err);
        // A full slot means a stop is already pending
        let _ = fatal_tx.try_send(AppError::Fatal(err.to_string()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_login_text() {
        let err = AppError::DuplicateLogin("alice".to_string());
        assert_eq!(err.to_string(), "userid alice is already logged in");
    }

    #[test]
    fn test_strict_escalation_scope() {
        let decode = serde_json::from_str::<u8>("nope").unwrap_err();
        assert!(AppError::Decode(decode).is_escalated_in_strict_mode());
        assert!(AppError::Write {
            userid: "bob".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        }
        .is_escalated_in_strict_mode());
        assert!(AppError::LineTooLong(64).is_escalated_in_strict_mode());
        assert!(!AppError::Evicted("slow".into()).is_escalated_in_strict_mode());
        assert!(!AppError::ChannelSend.is_escalated_in_strict_mode());
        assert!(!AppError::DuplicateLogin("alice".into()).is_escalated_in_strict_mode());
    }

    fn decode_error() -> AppError {
        AppError::Decode(serde_json::from_str::<u8>("nope").unwrap_err())
    }

    #[test]
    fn test_isolated_reporter_never_escalates() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = FaultReporter::new(FaultPolicy::Isolate, tx);
        assert!(!reporter.report(&decode_error()));
        assert!(rx.try_recv().is_err());
        assert!(!FaultReporter::isolated().report(&decode_error()));
    }

    #[test]
    fn test_strict_reporter_escalates_decode() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = FaultReporter::new(FaultPolicy::Strict, tx);
        assert!(!reporter.report(&AppError::ChannelSend));
        assert!(reporter.report(&decode_error()));
        assert!(matches!(rx.try_recv(), Ok(AppError::Fatal(_))));
    }
}
