// Wire messages between game server and clients: one JSON object per line.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::engine::command::Command;
use crate::engine::server::{ClientInfo, ConnectionId};
use crate::engine::snapshot::GameSnapshot;
use crate::engine::world::PlayerId;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SetName { name: String },
    Quit,
    Action { command: Command },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First line on every connection.
    Welcome {
        connection_id: ConnectionId,
        player_id: Option<PlayerId>,
    },
    /// Whole game state; replaces whatever the client had.
    Snapshot(GameSnapshot),
    /// Everyone currently connected; sent on join, leave and rename.
    Roster { clients: Vec<ClientInfo> },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message {line:?}: {source}")]
    Malformed {
        line: String,
        source: serde_json::Error,
    },
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Longest prefix of an offending line kept in errors and logs.
const ERROR_EXCERPT: usize = 120;

pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(|source| ProtocolError::Malformed {
        line: line.chars().take(ERROR_EXCERPT).collect(),
        source,
    })
}

pub fn decode_client(line: &str) -> Result<ClientMessage, ProtocolError> {
    decode(line)
}

pub fn decode_server(line: &str) -> Result<ServerMessage, ProtocolError> {
    decode(line)
}

/// Write one already-encoded message followed by a newline.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), ProtocolError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    write_line(writer, &encode(msg)?).await
}
