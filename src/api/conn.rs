// TCP game connections: accept loop and the per-connection read/write task.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;

use super::protocol::{self, ClientMessage, ProtocolError, ServerMessage};
use crate::engine::server::{ClientInfo, GameServer};
use crate::metrics;

/// Accept game connections until the server shuts down, then wait for every
/// connection task to finish.
pub async fn serve(listener: TcpListener, server: Arc<GameServer>) {
    let mut shutdown = server.shutdown_signal();
    let mut tasks = Vec::new();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "accepting game connections");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    let server = server.clone();
                    tasks.push(tokio::spawn(handle_connection(stream, address, server)));
                    tasks.retain(|t| !t.is_finished());
                }
                Err(e) => tracing::warn!("failed to accept connection: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }

    for result in join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!("connection task failed: {e}");
        }
    }
    tracing::info!("game listener closed");
}

/// Serve one peer. Whatever ends the session (quit, dropped socket, malformed
/// input, shutdown), the peer leaves the roster and everyone is told.
pub async fn handle_connection(stream: TcpStream, address: SocketAddr, server: Arc<GameServer>) {
    let _ = stream.set_nodelay(true);
    // Subscribe before registering so the peer sees its own roster entry.
    let rx = server.subscribe();
    let info = server.register(address);
    let connection = info.connection_id;

    match run_session(stream, &info, rx, &server).await {
        Ok(()) => {}
        Err(e @ ProtocolError::Malformed { .. }) => {
            metrics::MALFORMED_MESSAGES_TOTAL.inc();
            tracing::warn!(connection, "dropping client: {e}");
        }
        Err(e) => tracing::warn!(connection, "connection closed: {e}"),
    }
    server.unregister(connection);
}

async fn run_session(
    stream: TcpStream,
    info: &ClientInfo,
    mut rx: tokio::sync::broadcast::Receiver<String>,
    server: &GameServer,
) -> Result<(), ProtocolError> {
    let connection = info.connection_id;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut shutdown = server.shutdown_signal();

    protocol::write_message(
        &mut writer,
        &ServerMessage::Welcome {
            connection_id: connection,
            player_id: info.player_id,
        },
    )
    .await?;
    if let Some(snapshot) = server.latest_snapshot() {
        protocol::write_line(&mut writer, &snapshot).await?;
    }
    server.broadcast_roster();
    server.notify_joined(connection);

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Ok(line) => protocol::write_line(&mut writer, &line).await?,
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(n)) => {
                    // The next snapshot replaces everything that was skipped.
                    tracing::warn!(connection, "client lagged, skipped {n} messages");
                }
            },
            inbound = lines.next_line() => {
                let Some(line) = inbound? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match protocol::decode_client(&line)? {
                    ClientMessage::SetName { name } => server.rename(connection, &name),
                    ClientMessage::Quit => {
                        tracing::debug!(connection, "client quit");
                        break;
                    }
                    ClientMessage::Action { command } => server.submit(connection, command),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}
