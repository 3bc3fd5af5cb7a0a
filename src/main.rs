use std::sync::Arc;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use tilewar_server::api::{self, conn, protocol::ProtocolError};
use tilewar_server::client::GameClient;
use tilewar_server::config::{Config, ConfigError};
use tilewar_server::engine::game::Game;
use tilewar_server::engine::server::{GameServer, ServerError};
use tilewar_server::metrics;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("HTTP server failed: {0}")]
    Http(std::io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    let result = match &config.join {
        Some(addr) => join(&config, addr).await,
        None => serve(&config).await,
    };
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn bind(port: u16) -> Result<TcpListener, AppError> {
    let addr = format!("0.0.0.0:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| AppError::Bind { addr, source })
}

async fn serve(config: &Config) -> Result<(), AppError> {
    metrics::register_metrics();

    let rules = Arc::new(config.load_rules()?);
    let layout = config.load_layout()?;
    let game = Game::new(&layout, rules);

    let game_server = Arc::new(GameServer::new());
    game_server.set_map_name(&config.map_name());

    let game_listener = bind(config.port).await?;
    let http_listener = bind(config.http_port).await?;

    game_server.start_simulation(game)?;
    tracing::info!(
        map = %config.map_name(),
        players = config.players,
        "Tilewar server listening on ports {} (game) and {} (http)",
        config.port,
        config.http_port
    );

    let connections = tokio::spawn(conn::serve(game_listener, game_server.clone()));

    let stopper = game_server.clone();
    let http = axum::serve(http_listener, api::router(game_server.clone()))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
            }
            tracing::info!("shutting down");
            stopper.stop();
        })
        .await;

    // The HTTP side may also fail on its own; make sure everything else stops.
    game_server.stop();
    if let Err(e) = connections.await {
        tracing::error!("game listener task failed: {e}");
    }
    let sim = game_server.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || sim.join_simulation()).await {
        tracing::error!("failed to join simulation: {e}");
    }
    http.map_err(AppError::Http)
}

async fn join(config: &Config, addr: &str) -> Result<(), AppError> {
    let rules = Arc::new(config.load_rules()?);
    let layout = config.load_layout()?;
    let game = Game::new(&layout, rules);

    let client = GameClient::connect(addr, config.name.as_deref(), game).await?;
    tracing::info!(%addr, "connected; type commands (up, action, build-tower, ...) or quit");

    // Print a status line about once per second of game time.
    let client = Arc::new(client);
    let status = {
        let client = client.clone();
        let mut updates = client.updates();
        tokio::spawn(async move {
            let mut last_tick = 0;
            while updates.changed().await.is_ok() {
                let line = client.with_state(|state| {
                    let game = &state.game;
                    if game.tick < last_tick + u64::from(game.rules().ticks_per_second) {
                        return None;
                    }
                    last_tick = game.tick;
                    let me = state.player_id.and_then(|id| game.player(id));
                    Some(match me {
                        Some(p) => format!(
                            "tick {} | gold {} (+{:.1}/s) | cursor {} | {:?}",
                            game.tick, p.gold, p.income, p.cursor, p.mode
                        ),
                        None => format!("tick {} | spectating", game.tick),
                    })
                });
                if let Some(line) = line {
                    tracing::info!("{line}");
                }
            }
        })
    };

    let result = client.drive(BufReader::new(tokio::io::stdin())).await;
    status.abort();
    Ok(result?)
}
