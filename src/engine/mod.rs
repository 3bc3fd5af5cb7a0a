pub mod building;
pub mod command;
pub mod config;
pub mod game;
pub mod map;
pub mod path;
pub mod player;
pub mod server;
pub mod snapshot;
pub mod unit;
pub mod world;

use thiserror::Error;

use self::config::BuildingKind;
use self::world::PlayerId;

/// Why a player command was refused. Refusals never mutate state; the
/// interpreter logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Refusal {
    #[error("player {0} has lost")]
    PlayerLost(PlayerId),
    #[error("game is over")]
    GameOver,
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("no tile in that direction")]
    OffGrid,
    #[error("tile is not owned by the player")]
    NotOwner,
    #[error("tile already has a building")]
    Occupied,
    #[error("tile has no building")]
    NoBuilding,
    #[error("building is still under construction")]
    UnderConstruction,
    #[error("not enough gold: need {need}, have {have}")]
    InsufficientGold { need: i32, have: i32 },
    #[error("{0:?} cannot be upgraded")]
    NotUpgradable(BuildingKind),
    #[error("{from:?} cannot be upgraded into {to:?}")]
    IllegalUpgrade { from: BuildingKind, to: BuildingKind },
    #[error("paths start from a built barracks")]
    NotBarracks,
    #[error("another path of this player already crosses that tile")]
    PathCrossing,
    #[error("paths cannot run over the player's own buildings")]
    PathBlocked,
    #[error("no path is being built")]
    NoActivePath,
    #[error("command has no meaning in the current mode")]
    WrongMode,
}
