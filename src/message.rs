//! Message protocol definitions
//!
//! Wire packets are JSON objects with the fields `Action`, `Userid` and
//! `Data`, one per line. [`Message`] is the internal fan-out unit passed
//! from connection readers through the hub to client writers.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::AppError;
use crate::types::{SessionId, SYSTEM_USERID};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest accepted line, newline included
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Packet action
///
/// Any string other than the three known actions decodes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Claim a userid for this connection
    Login,
    /// Chat text to fan out
    Msg,
    /// Leave the chat
    Quit,
    /// Unrecognised or missing action
    #[default]
    #[serde(other)]
    Unknown,
}

/// Wire record exchanged line-by-line between client and server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Packet {
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub userid: String,
    #[serde(default)]
    pub data: String,
}

impl Packet {
    /// LOGIN packet claiming `userid`
    pub fn login(userid: impl Into<String>) -> Self {
        Self {
            action: Action::Login,
            userid: userid.into(),
            data: String::new(),
        }
    }

    /// MSG packet
    pub fn msg(userid: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            action: Action::Msg,
            userid: userid.into(),
            data: data.into(),
        }
    }

    /// QUIT packet
    pub fn quit(userid: impl Into<String>) -> Self {
        Self {
            action: Action::Quit,
            userid: userid.into(),
            data: String::new(),
        }
    }
}

/// Who produced a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A connection's reader
    Session(SessionId),
    /// The hub itself
    System,
}

/// Internal fan-out unit
///
/// `origin` is only consulted to skip the producing session during
/// fan-out; it never drives registry changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Userid the message is attributed to
    pub sender: String,
    /// Text payload
    pub payload: String,
    /// Producer of the message
    pub origin: Origin,
}

impl Message {
    /// Message produced by a connection
    pub fn from_session(
        origin: SessionId,
        sender: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            payload: payload.into(),
            origin: Origin::Session(origin),
        }
    }

    /// Notice produced by the server itself
    pub fn system(payload: impl Into<String>) -> Self {
        Self {
            sender: SYSTEM_USERID.to_string(),
            payload: payload.into(),
            origin: Origin::System,
        }
    }

    /// Whether this message was produced by the given session
    pub fn is_from(&self, session: SessionId) -> bool {
        self.origin == Origin::Session(session)
    }

    /// Wire packet delivered to recipients
    pub fn to_packet(&self) -> Packet {
        Packet::msg(self.sender.clone(), self.payload.clone())
    }
}

/// Read the next packet from a line-oriented stream
///
/// Blank lines are skipped. Returns `Ok(None)` on end of stream and
/// `AppError::Decode` when a line is not a well-formed packet.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = (&mut *reader)
            .take(MAX_LINE_BYTES as u64)
            .read_line(&mut line)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }
        if bytes == MAX_LINE_BYTES && !line.ends_with('\n') {
            return Err(AppError::LineTooLong(MAX_LINE_BYTES));
        }

        if let Some(packet) = decode_line(&line)? {
            return Ok(Some(packet));
        }
    }
}

/// Decode one line; blank lines yield `Ok(None)`
pub fn decode_line(line: &str) -> Result<Option<Packet>, AppError> {
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(AppError::Decode)
}

/// Write one packet followed by a newline and flush
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(packet).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
