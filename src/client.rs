// Game client: connects to a server, keeps a local mirror of the game up to
// date from snapshots and sends commands on the player's behalf.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::protocol::{self, ClientMessage, ProtocolError, ServerMessage};
use crate::engine::command::Command;
use crate::engine::game::Game;
use crate::engine::server::{ClientInfo, ConnectionId};
use crate::engine::world::PlayerId;

/// What the client currently knows about the game.
#[derive(Debug, Clone)]
pub struct MirrorState {
    pub game: Game,
    pub connection_id: Option<ConnectionId>,
    pub player_id: Option<PlayerId>,
    pub roster: Vec<ClientInfo>,
    pub snapshots_applied: u64,
}

pub struct GameClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    state: Arc<Mutex<MirrorState>>,
    updates: watch::Receiver<u64>,
    reader: JoinHandle<()>,
}

impl GameClient {
    /// Connect and start mirroring. `game` must be built from the same map and
    /// rules as the server's; snapshots for another topology are rejected.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        name: Option<&str>,
        game: Game,
    ) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();

        let state = Arc::new(Mutex::new(MirrorState {
            game,
            connection_id: None,
            player_id: None,
            roster: Vec::new(),
            snapshots_applied: 0,
        }));
        let (updates_tx, updates) = watch::channel(0u64);
        let reader = tokio::spawn(read_messages(BufReader::new(read), state.clone(), updates_tx));

        let client = Self {
            writer: tokio::sync::Mutex::new(write),
            state,
            updates,
            reader,
        };
        if let Some(name) = name {
            client.set_name(name).await?;
        }
        Ok(client)
    }

    pub async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        protocol::write_message(&mut *writer, msg).await
    }

    pub async fn send_command(&self, command: Command) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Action { command }).await
    }

    pub async fn set_name(&self, name: &str) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::SetName {
            name: name.to_string(),
        })
        .await
    }

    pub async fn quit(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Quit).await
    }

    /// A copy of the current mirror.
    pub fn state(&self) -> MirrorState {
        self.state.lock().unwrap().clone()
    }

    /// Run `f` against the mirror without copying it.
    pub fn with_state<R>(&self, f: impl FnOnce(&MirrorState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    /// Bumped after every message the server sends.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.clone()
    }

    /// True once the server closed the connection.
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }

    /// Read command labels (`up`, `action`, `build-tower`, ...) one per line
    /// and send them until input ends or the connection drops.
    pub async fn drive<R: AsyncBufRead + Unpin>(&self, input: R) -> Result<(), ProtocolError> {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                break;
            }
            match line.parse::<Command>() {
                Ok(command) => self.send_command(command).await?,
                Err(e) => tracing::warn!("{e}"),
            }
            if self.is_closed() {
                return Ok(());
            }
        }
        self.quit().await
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_messages<R: AsyncBufRead + Unpin>(
    reader: R,
    state: Arc<Mutex<MirrorState>>,
    updates: watch::Sender<u64>,
) {
    let mut lines = reader.lines();
    let mut received = 0u64;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("connection to server lost: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let msg = match protocol::decode_server(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("ignoring server message: {e}");
                continue;
            }
        };
        apply_message(&mut state.lock().unwrap(), msg);
        received += 1;
        let _ = updates.send(received);
    }
    tracing::info!("server closed the connection");
}

fn apply_message(state: &mut MirrorState, msg: ServerMessage) {
    match msg {
        ServerMessage::Welcome {
            connection_id,
            player_id,
        } => {
            tracing::info!(connection = connection_id, player = ?player_id, "joined game");
            state.connection_id = Some(connection_id);
            state.player_id = player_id;
        }
        ServerMessage::Snapshot(snapshot) => match state.game.apply_snapshot(&snapshot) {
            Ok(()) => state.snapshots_applied += 1,
            Err(e) => tracing::warn!("rejected snapshot: {e}"),
        },
        ServerMessage::Roster { clients } => state.roster = clients,
    }
}
