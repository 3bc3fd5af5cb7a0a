// Whole-state snapshots: what the server broadcasts and what a mirror applies.
//
// A snapshot carries everything needed to redraw and to keep simulating, so a
// mirror that applies one ends up observably identical to the server.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::building::{Building, BuildingState};
use super::config::{BuildingKind, Family};
use super::game::Game;
use super::path::{Path, PathId};
use super::player::Mode;
use super::unit::{Bullet, Soldier, SoldierKind, UnitId};
use super::world::{Direction, PlayerId, TileId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingSnapshot {
    pub kind: BuildingKind,
    pub owner: PlayerId,
    pub health: i32,
    pub built: bool,
    #[serde(default)]
    pub cooldown: u32,
    #[serde(default)]
    pub damage_timer: u32,
    /// Barracks only: soldiers waiting in the training queue.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub queued: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub can_release: bool,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSnapshot {
    pub owner: Option<PlayerId>,
    pub building: Option<BuildingSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSnapshot {
    pub id: PathId,
    pub owner: PlayerId,
    pub tiles: Vec<TileId>,
    pub released: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub kind: SoldierKind,
    pub owner: PlayerId,
    pub barracks_tile: TileId,
    pub path_id: PathId,
    pub position: (f32, f32),
    pub velocity: (f32, f32),
    pub path_index: usize,
    pub facing_left: bool,
    pub health: i32,
    pub max_health: i32,
    pub damage: i32,
    pub dying: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletSnapshot {
    pub target: UnitId,
    pub position: (f32, f32),
    pub target_position: (f32, f32),
    pub velocity: (f32, f32),
    pub damage: i32,
    pub life: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub gold: i32,
    pub income: f32,
    pub cursor: TileId,
    pub mode: Mode,
    pub lost: bool,
    #[serde(default)]
    pub drawing: Option<PathId>,
    #[serde(default)]
    pub steps: Vec<Direction>,
}

/// The full observable game state for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub tick: u64,
    pub tiles: Vec<TileSnapshot>,
    pub paths: Vec<PathSnapshot>,
    pub units: Vec<UnitSnapshot>,
    pub bullets: Vec<BulletSnapshot>,
    pub players: Vec<PlayerSnapshot>,
    pub winner: Option<PlayerId>,
    pub is_over: bool,
    /// Id counters, so a mirror hands out the same ids the server would.
    #[serde(default = "first_id")]
    pub next_path_id: PathId,
    #[serde(default = "first_id")]
    pub next_unit_id: UnitId,
}

fn first_id() -> u32 {
    1
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot has {found} tiles, local map has {expected}")]
    TileCount { expected: usize, found: usize },
    #[error("snapshot mentions unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("snapshot references tile {0} outside the map")]
    BadTile(TileId),
}

impl Game {
    /// Capture the whole state.
    pub fn snapshot(&self) -> GameSnapshot {
        let tiles = self
            .world
            .tiles()
            .iter()
            .map(|t| TileSnapshot {
                owner: t.owner(),
                building: t.building().map(|b| BuildingSnapshot {
                    kind: b.kind,
                    owner: b.owner,
                    health: b.health,
                    built: b.built,
                    cooldown: b.cooldown,
                    damage_timer: b.damage_timer,
                    queued: b.queued_soldiers(),
                    path: b.attached_path(),
                    can_release: b.can_release(),
                }),
            })
            .collect();

        let paths = self
            .paths
            .values()
            .map(|p| PathSnapshot {
                id: p.id,
                owner: p.owner,
                tiles: p.tiles.clone(),
                released: p.released,
            })
            .collect();

        let units = self
            .units
            .values()
            .map(|u| UnitSnapshot {
                id: u.id,
                kind: u.kind,
                owner: u.owner,
                barracks_tile: u.barracks_tile,
                path_id: u.path,
                position: u.pos,
                velocity: u.velocity,
                path_index: u.index,
                facing_left: u.facing_left,
                health: u.health,
                max_health: u.max_health,
                damage: u.damage,
                dying: u.dying,
            })
            .collect();

        let bullets = self
            .bullets
            .iter()
            .map(|b| BulletSnapshot {
                target: b.target,
                position: b.pos,
                target_position: b.target_pos,
                velocity: b.velocity,
                damage: b.damage,
                life: b.life,
            })
            .collect();

        let players = self
            .players
            .values()
            .map(|p| PlayerSnapshot {
                id: p.id,
                gold: p.gold,
                income: p.income,
                cursor: p.cursor,
                mode: p.mode,
                lost: p.lost,
                drawing: p.builder.path,
                steps: p.builder.steps.clone(),
            })
            .collect();

        GameSnapshot {
            tick: self.tick,
            tiles,
            paths,
            units,
            bullets,
            players,
            winner: self.winner,
            is_over: self.is_over,
            next_path_id: self.next_path_id,
            next_unit_id: self.next_unit_id,
        }
    }

    /// Overwrite local state with a snapshot taken on the same map. Nothing is
    /// touched unless the snapshot fits the local topology.
    pub fn apply_snapshot(&mut self, snap: &GameSnapshot) -> Result<(), SnapshotError> {
        self.check_snapshot(snap)?;

        for (id, ts) in snap.tiles.iter().enumerate() {
            match &ts.building {
                Some(bs) => {
                    let building = self.building_from_snapshot(bs);
                    self.world.replace_building(id, building);
                }
                None => {
                    self.world.take_building_raw(id);
                }
            }
        }
        self.world.rebuild_ownership();
        for (id, ts) in snap.tiles.iter().enumerate() {
            self.world.set_owner(id, ts.owner);
        }

        self.paths = snap
            .paths
            .iter()
            .map(|p| {
                (
                    p.id,
                    Path {
                        id: p.id,
                        owner: p.owner,
                        tiles: p.tiles.clone(),
                        released: p.released,
                    },
                )
            })
            .collect();
        self.world.clear_all_path_markers();
        for path in self.paths.values() {
            for &tile in &path.tiles {
                self.world.set_path_marker(tile, path.owner, path.id);
            }
        }

        self.units = snap
            .units
            .iter()
            .map(|u| {
                (
                    u.id,
                    Soldier {
                        id: u.id,
                        kind: u.kind,
                        owner: u.owner,
                        health: u.health,
                        max_health: u.max_health,
                        damage: u.damage,
                        path: u.path_id,
                        barracks_tile: u.barracks_tile,
                        index: u.path_index,
                        pos: u.position,
                        velocity: u.velocity,
                        facing_left: u.facing_left,
                        dying: u.dying,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        self.world.clear_all_units();
        let placements: Vec<(TileId, UnitId)> = self
            .units
            .values()
            .filter(|u| u.is_alive())
            .filter_map(|u| {
                let tile = self.paths.get(&u.path)?.tiles.get(u.index)?;
                Some((*tile, u.id))
            })
            .collect();
        for (tile, unit) in placements {
            self.world.add_unit(tile, unit);
        }

        self.bullets = snap
            .bullets
            .iter()
            .map(|b| Bullet {
                target: b.target,
                pos: b.position,
                target_pos: b.target_position,
                velocity: b.velocity,
                damage: b.damage,
                life: b.life,
            })
            .collect();

        for ps in &snap.players {
            if let Some(p) = self.players.get_mut(&ps.id) {
                p.gold = ps.gold;
                p.income = ps.income;
                p.cursor = ps.cursor;
                p.mode = ps.mode;
                p.lost = ps.lost;
                p.builder.path = ps.drawing;
                p.builder.steps = ps.steps.clone();
            }
        }

        self.tick = snap.tick;
        self.winner = snap.winner;
        self.is_over = snap.is_over;
        // Never hand out an id that is already on the board.
        self.next_path_id = snap
            .next_path_id
            .max(self.paths.keys().max().map_or(1, |id| id + 1));
        self.next_unit_id = snap
            .next_unit_id
            .max(self.units.keys().max().map_or(1, |id| id + 1));
        Ok(())
    }

    fn check_snapshot(&self, snap: &GameSnapshot) -> Result<(), SnapshotError> {
        let len = self.world.len();
        if snap.tiles.len() != len {
            return Err(SnapshotError::TileCount {
                expected: len,
                found: snap.tiles.len(),
            });
        }
        let known = |p: PlayerId| {
            if self.players.contains_key(&p) {
                Ok(())
            } else {
                Err(SnapshotError::UnknownPlayer(p))
            }
        };
        let in_map = |t: TileId| if t < len { Ok(()) } else { Err(SnapshotError::BadTile(t)) };

        for ps in &snap.players {
            known(ps.id)?;
            in_map(ps.cursor)?;
        }
        for ts in &snap.tiles {
            if let Some(owner) = ts.owner {
                known(owner)?;
            }
            if let Some(b) = &ts.building {
                known(b.owner)?;
            }
        }
        for p in &snap.paths {
            known(p.owner)?;
            p.tiles.iter().try_for_each(|t| in_map(*t))?;
        }
        for u in &snap.units {
            known(u.owner)?;
            in_map(u.barracks_tile)?;
        }
        Ok(())
    }

    fn building_from_snapshot(&self, bs: &BuildingSnapshot) -> Building {
        let mut b = Building::new(bs.kind, bs.owner, &self.rules);
        b.health = bs.health;
        b.built = bs.built;
        b.cooldown = bs.cooldown;
        b.damage_timer = bs.damage_timer;
        if bs.kind.family() == Family::Barracks {
            let soldier = self.rules.soldier(bs.kind);
            b.state = BuildingState::Barracks {
                queue: VecDeque::from(vec![soldier; bs.queued]),
                path: bs.path,
                can_release: bs.can_release,
            };
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::Command;
    use crate::engine::config::Rules;
    use crate::engine::game::tests::{game_with, ready_building};

    const MAP: &str = "1oooo\nooooo\nooo.2\n";

    /// A game with a bit of everything going on: buildings under construction,
    /// a released path with soldiers walking it, and a tower in range.
    fn busy_game() -> Game {
        let mut game = game_with(MAP, Rules::default());
        let barracks = game.world.tile_at(1, 1).unwrap();
        ready_building(&mut game, barracks, BuildingKind::Barracks, 1);
        let tower = game.world.tile_at(4, 1).unwrap();
        ready_building(&mut game, tower, BuildingKind::Tower, 2);
        game.start_path(1, barracks).unwrap();
        game.step_path(1, Direction::Right).unwrap();
        game.step_path(1, Direction::Right).unwrap();
        game.step_path(1, Direction::DownRight).unwrap();
        game.finish_path(1).unwrap();
        let market = game.world.tile_at(0, 1).unwrap();
        game.players.get_mut(&1).unwrap().cursor = market;
        game.execute_command(1, Command::BuildMarket).unwrap();
        for _ in 0..300 {
            game.tick();
        }
        game
    }

    #[test]
    fn test_snapshot_round_trip_into_fresh_game() {
        let game = busy_game();
        let snap = game.snapshot();
        assert!(!snap.units.is_empty());

        let json = serde_json::to_string(&snap).unwrap();
        let decoded: GameSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snap);

        let mut mirror = game_with(MAP, Rules::default());
        mirror.apply_snapshot(&decoded).unwrap();
        assert_eq!(mirror.snapshot(), snap);
        for (a, b) in game.world.tiles().iter().zip(mirror.world.tiles()) {
            assert_eq!(a.ownership_counters(), b.ownership_counters());
            assert_eq!(a.units(), b.units());
            assert_eq!(a.path_marker(1), b.path_marker(1));
        }
    }

    #[test]
    fn test_mirror_keeps_simulating_in_step() {
        let mut game = busy_game();
        let mut mirror = game_with(MAP, Rules::default());
        mirror.apply_snapshot(&game.snapshot()).unwrap();
        for _ in 0..120 {
            game.tick();
            mirror.tick();
        }
        assert_eq!(mirror.snapshot(), game.snapshot());
    }

    #[test]
    fn test_apply_removes_buildings_absent_from_snapshot() {
        let fresh = game_with(MAP, Rules::default());
        let mut game = busy_game();
        game.apply_snapshot(&fresh.snapshot()).unwrap();
        assert_eq!(game.snapshot(), fresh.snapshot());
        assert!(game.units.is_empty());
        assert!(game.world.tiles().iter().all(|t| t.path_marker(1).is_none()));
    }

    #[test]
    fn test_mismatched_topology_rejected() {
        let game = busy_game();
        let mut other = game_with("1o\no2\n", Rules::default());
        let before = other.snapshot();
        assert_eq!(
            other.apply_snapshot(&game.snapshot()),
            Err(SnapshotError::TileCount {
                expected: 4,
                found: game.world.len()
            })
        );
        assert_eq!(other.snapshot(), before);
    }

    #[test]
    fn test_unknown_player_rejected() {
        let mut game = game_with(MAP, Rules::default());
        let mut snap = game.snapshot();
        snap.players[0].id = 7;
        assert_eq!(
            game.apply_snapshot(&snap),
            Err(SnapshotError::UnknownPlayer(7))
        );
    }
}
