// Game server: owns the authoritative game on a dedicated thread, queues
// player commands for it and broadcasts state to every connected client.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::api::protocol::{self, ServerMessage};
use crate::metrics;

use super::command::Command;
use super::game::Game;
use super::world::PlayerId;

pub type ConnectionId = u64;

/// How often the full state is pushed even when nothing was commanded.
pub const PUSH_INTERVAL: Duration = Duration::from_millis(300);

/// Longest display name kept in the roster.
pub const MAX_NAME_LEN: usize = 32;

/// A connected peer as shown in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub connection_id: ConnectionId,
    pub name: String,
    pub address: String,
    /// The player this connection controls; `None` for spectators.
    pub player_id: Option<PlayerId>,
    pub connected_at: String,
}

/// Work handed to the simulation thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A peer connected and should see the current state right away.
    Joined(ConnectionId),
    Command {
        connection: ConnectionId,
        player: PlayerId,
        command: Command,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("a game is already running")]
    AlreadyRunning,
    #[error("failed to spawn the simulation thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Metadata about the running game.
#[derive(Debug, Clone, Serialize)]
pub struct GameStatus {
    pub running: bool,
    pub tick: u64,
    pub players: u32,
    pub clients: usize,
    pub map: Option<String>,
}

/// Manages the authoritative game instance. The game itself lives only on the
/// simulation thread; everything else talks to it through the inbound queue.
pub struct GameServer {
    broadcast_tx: broadcast::Sender<String>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    running: Arc<AtomicBool>,
    /// Most recent snapshot message, for late joiners and the HTTP side channel.
    latest_snapshot: Arc<Mutex<Option<String>>>,
    roster: Arc<Mutex<BTreeMap<ConnectionId, ClientInfo>>>,
    next_connection: AtomicU64,
    /// Number of players in the running game; connection n controls player n.
    player_count: Arc<AtomicU64>,
    current_tick: Arc<AtomicU64>,
    map_name: Mutex<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
    sim_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GameServer {
    fn default() -> Self {
        Self::new()
    }
}

impl GameServer {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broadcast_tx: tx,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            running: Arc::new(AtomicBool::new(false)),
            latest_snapshot: Arc::new(Mutex::new(None)),
            roster: Arc::new(Mutex::new(BTreeMap::new())),
            next_connection: AtomicU64::new(1),
            player_count: Arc::new(AtomicU64::new(0)),
            current_tick: Arc::new(AtomicU64::new(0)),
            map_name: Mutex::new(None),
            shutdown_tx,
            sim_thread: Mutex::new(None),
        }
    }

    /// Subscribe to outbound messages. Returns a receiver that yields JSON lines.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    /// Resolves once the server starts shutting down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Cached snapshot message for late-joining clients.
    pub fn latest_snapshot(&self) -> Option<String> {
        self.latest_snapshot.lock().unwrap().clone()
    }

    pub fn roster(&self) -> Vec<ClientInfo> {
        self.roster.lock().unwrap().values().cloned().collect()
    }

    pub fn set_map_name(&self, name: &str) {
        *self.map_name.lock().unwrap() = Some(name.to_string());
    }

    pub fn status(&self) -> GameStatus {
        GameStatus {
            running: self.is_running(),
            tick: self.current_tick.load(Ordering::Relaxed),
            players: self.player_count.load(Ordering::Relaxed) as u32,
            clients: self.roster.lock().unwrap().len(),
            map: self.map_name.lock().unwrap().clone(),
        }
    }

    // ── Simulation thread ────────────────────────────────────────────

    /// Start the tick loop for `game` on a dedicated OS thread. Each tick drains
    /// the inbound queue, advances the game and pushes a snapshot when commands
    /// arrived or the push interval elapsed.
    pub fn start_simulation(&self, game: Game) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        let mut inbound = self
            .inbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(ServerError::AlreadyRunning)?;

        let tx = self.broadcast_tx.clone();
        let running = self.running.clone();
        let latest = self.latest_snapshot.clone();
        let current_tick = self.current_tick.clone();
        self.player_count
            .store(game.players.len() as u64, Ordering::Relaxed);
        let tick_len = Duration::from_secs_f64(1.0 / f64::from(game.rules().ticks_per_second.max(1)));

        running.store(true, Ordering::Relaxed);
        metrics::ACTIVE_GAMES.set(1);

        let handle = std::thread::Builder::new()
            .name("simulation".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut game = game;
                    publish_snapshot(&game, &tx, &latest);
                    let mut last_push = Instant::now();
                    let mut next_tick = Instant::now() + tick_len;
                    let mut announced_end = false;

                    while running.load(Ordering::Relaxed) {
                        let mut dirty = false;
                        while let Ok(msg) = inbound.try_recv() {
                            dirty = true;
                            if let Inbound::Command {
                                connection,
                                player,
                                command,
                            } = msg
                            {
                                tracing::trace!(connection, player, %command, "applying command");
                                let _ = game.execute_command(player, command);
                            }
                        }

                        game.tick();
                        current_tick.store(game.tick, Ordering::Relaxed);

                        if game.is_over && !announced_end {
                            announced_end = true;
                            dirty = true;
                            tracing::info!(winner = ?game.winner, tick = game.tick, "game finished");
                        }
                        if dirty || last_push.elapsed() >= PUSH_INTERVAL {
                            publish_snapshot(&game, &tx, &latest);
                            last_push = Instant::now();
                        }

                        let now = Instant::now();
                        if next_tick > now {
                            std::thread::sleep(next_tick - now);
                            next_tick += tick_len;
                        } else {
                            // Fell behind; do not try to catch up with a burst of ticks.
                            next_tick = now + tick_len;
                        }
                    }
                }));

                if let Err(panic_info) = result {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    tracing::error!("Simulation thread panicked: {}", msg);
                }

                metrics::ACTIVE_GAMES.set(0);
                running.store(false, Ordering::Relaxed);
            });

        match handle {
            Ok(handle) => {
                *self.sim_thread.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Relaxed);
                metrics::ACTIVE_GAMES.set(0);
                Err(ServerError::Spawn(e))
            }
        }
    }

    /// Stop the simulation and tell every connection to close.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the simulation thread to exit. Blocks; call after `stop`.
    pub fn join_simulation(&self) {
        let handle = self.sim_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("simulation thread could not be joined");
            }
        }
    }

    // ── Connections ──────────────────────────────────────────────────

    /// Add a peer to the roster. Connection n controls player n when the game
    /// has one; everyone else spectates.
    pub fn register(&self, address: SocketAddr) -> ClientInfo {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let players = self.player_count.load(Ordering::Relaxed);
        let player_id = (connection_id <= players).then_some(connection_id as PlayerId);
        let info = ClientInfo {
            connection_id,
            name: format!("player-{connection_id}"),
            address: address.to_string(),
            player_id,
            connected_at: chrono::Utc::now().to_rfc3339(),
        };
        self.roster
            .lock()
            .unwrap()
            .insert(connection_id, info.clone());
        metrics::CONNECTED_CLIENTS.inc();
        tracing::info!(connection = connection_id, %address, player = ?player_id, "client connected");
        info
    }

    /// Drop a peer from the roster and tell everyone else.
    pub fn unregister(&self, connection: ConnectionId) {
        let removed = self.roster.lock().unwrap().remove(&connection);
        if let Some(info) = removed {
            metrics::CONNECTED_CLIENTS.dec();
            tracing::info!(connection, name = %info.name, "client disconnected");
            self.broadcast_roster();
        }
    }

    pub fn rename(&self, connection: ConnectionId, name: &str) {
        let name: String = name.trim().chars().take(MAX_NAME_LEN).collect();
        if name.is_empty() {
            return;
        }
        let changed = match self.roster.lock().unwrap().get_mut(&connection) {
            Some(info) if info.name != name => {
                info.name = name;
                true
            }
            _ => false,
        };
        if changed {
            self.broadcast_roster();
        }
    }

    /// Ask the simulation to push the current state soon.
    pub fn notify_joined(&self, connection: ConnectionId) {
        let _ = self.inbound_tx.send(Inbound::Joined(connection));
    }

    /// Queue a command from a connection. Spectators' commands are dropped.
    pub fn submit(&self, connection: ConnectionId, command: Command) {
        let player = self
            .roster
            .lock()
            .unwrap()
            .get(&connection)
            .and_then(|c| c.player_id);
        let Some(player) = player else {
            tracing::debug!(connection, %command, "spectator command ignored");
            return;
        };
        if self
            .inbound_tx
            .send(Inbound::Command {
                connection,
                player,
                command,
            })
            .is_err()
        {
            tracing::warn!(connection, "simulation is gone, command dropped");
        }
    }

    pub fn broadcast_roster(&self) {
        let msg = ServerMessage::Roster {
            clients: self.roster(),
        };
        match protocol::encode(&msg) {
            Ok(json) => {
                let _ = self.broadcast_tx.send(json);
            }
            Err(e) => tracing::error!("failed to encode roster: {e}"),
        }
    }
}

fn publish_snapshot(
    game: &Game,
    tx: &broadcast::Sender<String>,
    latest: &Mutex<Option<String>>,
) {
    let msg = ServerMessage::Snapshot(game.snapshot());
    match protocol::encode(&msg) {
        Ok(json) => {
            metrics::SNAPSHOTS_BROADCAST_TOTAL.inc();
            metrics::SNAPSHOT_BYTES.observe(json.len() as f64);
            *latest.lock().unwrap() = Some(json.clone());
            // No subscribers is fine; the cache still serves late joiners.
            let _ = tx.send(json);
        }
        Err(e) => tracing::error!("failed to encode snapshot: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::Rules;
    use crate::engine::map::MapLayout;
    use crate::engine::world::Direction;

    fn game() -> Game {
        let layout = MapLayout::parse("1oooo\nooooo\nooo.2\n", 2).unwrap();
        Game::new(&layout, Arc::new(Rules::default()))
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_connections_map_to_players_then_spectators() {
        let server = GameServer::new();
        server.player_count.store(2, Ordering::Relaxed);
        let a = server.register(addr());
        let b = server.register(addr());
        let c = server.register(addr());
        assert_eq!(a.player_id, Some(1));
        assert_eq!(b.player_id, Some(2));
        assert_eq!(c.player_id, None);
        assert_eq!(server.roster().len(), 3);

        server.unregister(b.connection_id);
        assert_eq!(server.roster().len(), 2);
        // Slots are not handed out again.
        assert_eq!(server.register(addr()).player_id, None);
    }

    #[test]
    fn test_rename_broadcasts_roster() {
        let server = GameServer::new();
        let mut rx = server.subscribe();
        let a = server.register(addr());
        server.rename(a.connection_id, "  alice  ");
        let line = rx.try_recv().unwrap();
        assert!(line.contains("\"type\":\"roster\""));
        assert!(line.contains("\"alice\""));
        // Same name again: nothing to announce.
        server.rename(a.connection_id, "alice");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_spectator_commands_never_reach_the_queue() {
        let server = GameServer::new();
        let spectator = server.register(addr());
        server.submit(spectator.connection_id, Command::Action);
        let mut rx = server.inbound_rx.lock().unwrap().take().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_simulation_applies_commands_and_publishes() {
        let server = GameServer::new();
        let mut rx = server.subscribe();
        server.start_simulation(game()).unwrap();
        assert!(matches!(
            server.start_simulation(game()),
            Err(ServerError::AlreadyRunning)
        ));
        let a = server.register(addr());
        server.submit(a.connection_id, Command::Move(Direction::Right));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut moved = false;
        while Instant::now() < deadline && !moved {
            if let Ok(line) = rx.try_recv() {
                if let Ok(ServerMessage::Snapshot(snap)) = protocol::decode_server(&line) {
                    moved = snap.players[0].cursor == 1;
                }
            } else {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        assert!(moved);
        assert!(server.latest_snapshot().is_some());
        assert!(server.status().tick > 0);

        server.stop();
        server.join_simulation();
        assert!(!server.is_running());
    }
}
