// Soldiers walking released paths, and the bullets towers fire at them.

use serde::{Deserialize, Serialize};

use super::config::{BuildingKind, SoldierStats};
use super::game::Game;
use super::path::PathId;
use super::world::{PlayerId, TileId};

pub type UnitId = u32;

/// Squared distance under which a soldier counts as standing on its target tile.
const ARRIVAL_EPSILON_SQ: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoldierKind {
    Soldier,
    Swordsman,
    Shieldman,
}

impl SoldierKind {
    /// The soldier a barracks-family tag trains.
    pub fn trained_by(barracks: BuildingKind) -> SoldierKind {
        match barracks {
            BuildingKind::SwordsBarracks => SoldierKind::Swordsman,
            BuildingKind::ShieldsBarracks => SoldierKind::Shieldman,
            _ => SoldierKind::Soldier,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Soldier {
    pub id: UnitId,
    pub kind: SoldierKind,
    pub owner: PlayerId,
    pub health: i32,
    pub max_health: i32,
    pub damage: i32,
    pub path: PathId,
    /// Barracks the soldier came from.
    pub barracks_tile: TileId,
    /// Index of the target tile in the path.
    pub index: usize,
    pub pos: (f32, f32),
    /// Movement per tick towards the target tile.
    pub velocity: (f32, f32),
    pub facing_left: bool,
    /// Ticks left before a dying soldier is removed.
    pub dying: Option<u32>,
}

impl Soldier {
    pub fn is_alive(&self) -> bool {
        self.dying.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bullet {
    pub target: UnitId,
    pub pos: (f32, f32),
    /// Where the target stood when the tower fired.
    pub target_pos: (f32, f32),
    pub velocity: (f32, f32),
    pub damage: i32,
    /// Ticks in flight.
    pub life: u32,
}

fn dist_sq(a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    dx * dx + dy * dy
}

/// Velocity of length `speed` from `from` towards `to`; zero when already there.
fn heading(from: (f32, f32), to: (f32, f32), speed: f32) -> (f32, f32) {
    let d = dist_sq(from, to).sqrt();
    if d <= f32::EPSILON {
        return (0.0, 0.0);
    }
    ((to.0 - from.0) / d * speed, (to.1 - from.1) / d * speed)
}

/// Move `pos` towards `to` by at most `speed`, landing exactly on `to` when close enough.
fn step_towards(pos: (f32, f32), to: (f32, f32), speed: f32) -> (f32, f32) {
    let d = dist_sq(pos, to).sqrt();
    if d <= speed {
        return to;
    }
    let v = heading(pos, to, speed);
    (pos.0 + v.0, pos.1 + v.1)
}

/// What a soldier does this tick once it stands on its target tile.
enum Arrival {
    Attack(TileId),
    Advance(TileId, TileId),
    FellOff,
}

impl Game {
    /// Put a freshly trained soldier on the first tile of `path`, heading for the second.
    pub fn release_soldier(
        &mut self,
        barracks_tile: TileId,
        barracks: BuildingKind,
        stats: SoldierStats,
        path: PathId,
    ) {
        let Some(p) = self.paths.get(&path) else {
            tracing::warn!(path, "release onto a missing path dropped");
            return;
        };
        if p.tiles.len() < 2 {
            return;
        }
        let (owner, start, next) = (p.owner, p.tiles[0], p.tiles[1]);
        let pos = self.world.center(start);
        let target = self.world.center(next);
        let velocity = heading(pos, target, self.rules().soldier_speed);

        let id = self.next_unit_id;
        self.next_unit_id += 1;
        self.units.insert(
            id,
            Soldier {
                id,
                kind: SoldierKind::trained_by(barracks),
                owner,
                health: stats.health,
                max_health: stats.health,
                damage: stats.attack,
                path,
                barracks_tile,
                index: 1,
                pos,
                velocity,
                facing_left: velocity.0 < 0.0,
                dying: None,
            },
        );
        self.world.add_unit(next, id);
        crate::metrics::UNITS_RELEASED.inc();
        tracing::debug!(unit = id, owner, path, "soldier released");
    }

    /// Move every soldier one tick along its path, in unit id order.
    pub fn update_units(&mut self) {
        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        for id in ids {
            self.update_unit(id);
        }
    }

    fn update_unit(&mut self, id: UnitId) {
        let Some(unit) = self.units.get_mut(&id) else {
            return;
        };
        if let Some(left) = unit.dying {
            if left == 0 {
                self.units.remove(&id);
            } else {
                unit.dying = Some(left - 1);
            }
            return;
        }

        let target = match self.paths.get(&unit.path) {
            Some(path) if unit.index < path.tiles.len() => path.tiles[unit.index],
            _ => {
                self.kill_unit(id);
                return;
            }
        };

        let unit = match self.units.get_mut(&id) {
            Some(u) => u,
            None => return,
        };
        let center = self.world.center(target);
        if dist_sq(unit.pos, center) >= ARRIVAL_EPSILON_SQ {
            unit.pos = step_towards(unit.pos, center, self.rules.soldier_speed);
            return;
        }

        let arrival = match self.world.tile(target).building() {
            Some(b) if b.owner != unit.owner => Arrival::Attack(target),
            _ => match self.paths.get(&unit.path) {
                Some(path) if unit.index + 1 < path.tiles.len() => {
                    Arrival::Advance(target, path.tiles[unit.index + 1])
                }
                _ => Arrival::FellOff,
            },
        };

        match arrival {
            Arrival::Attack(tile) => {
                let damage = unit.damage;
                self.remove_unit(id, tile);
                self.attack_building(tile, damage);
            }
            Arrival::Advance(from, to) => {
                let next_center = self.world.center(to);
                let speed = self.rules.soldier_speed;
                if let Some(unit) = self.units.get_mut(&id) {
                    unit.index += 1;
                    unit.velocity = heading(unit.pos, next_center, speed);
                    unit.facing_left = unit.velocity.0 < 0.0;
                }
                self.world.remove_unit(from, id);
                self.world.add_unit(to, id);
            }
            Arrival::FellOff => self.remove_unit(id, target),
        }
    }

    fn remove_unit(&mut self, id: UnitId, tile: TileId) {
        self.units.remove(&id);
        self.world.remove_unit(tile, id);
    }

    /// Start the death countdown. The soldier leaves its tile immediately.
    fn kill_unit(&mut self, id: UnitId) {
        let dying_ticks = self.rules.dying_ticks;
        let Some(unit) = self.units.get_mut(&id) else {
            return;
        };
        if unit.dying.is_some() {
            return;
        }
        unit.dying = Some(dying_ticks);
        let tile = self
            .paths
            .get(&unit.path)
            .and_then(|p| p.tiles.get(unit.index))
            .copied();
        match tile {
            Some(tile) => self.world.remove_unit(tile, id),
            // The path is gone, so the tile is unknown.
            None => {
                for t in 0..self.world.len() {
                    self.world.remove_unit(t, id);
                }
            }
        }
    }

    /// Aim at the first living enemy soldier in range. Returns whether a bullet was fired.
    pub fn fire_tower(&mut self, tile: TileId) -> bool {
        let Some(tower) = self.world.tile(tile).building() else {
            return false;
        };
        let (owner, stats) = (tower.owner, *self.rules.stats(tower.kind));
        let origin = self.world.center(tile);

        let target = self
            .units
            .values()
            .find(|u| u.is_alive() && u.owner != owner && dist_sq(origin, u.pos) < stats.range_sq)
            .map(|u| (u.id, u.pos));
        let Some((target, target_pos)) = target else {
            return false;
        };

        self.bullets.push(Bullet {
            target,
            pos: origin,
            target_pos,
            velocity: heading(origin, target_pos, self.rules.bullet_speed),
            damage: stats.damage,
            life: 0,
        });
        tracing::trace!(tile, target, "tower fired");
        true
    }

    /// Fly every bullet one tick. Bullets hit on arrival or when their lifetime runs out.
    pub fn update_bullets(&mut self) {
        let speed = self.rules.bullet_speed;
        let max_life = self.rules.bullet_max_life;
        let hit_dist_sq = self.rules.bullet_hit_dist_sq;

        let mut hits = Vec::new();
        self.bullets.retain_mut(|b| {
            b.life += 1;
            if dist_sq(b.pos, b.target_pos) < hit_dist_sq || b.life >= max_life {
                hits.push((b.target, b.damage));
                return false;
            }
            b.velocity = heading(b.pos, b.target_pos, speed);
            b.pos = step_towards(b.pos, b.target_pos, speed);
            true
        });

        for (target, damage) in hits {
            self.damage_unit(target, damage);
        }
    }

    fn damage_unit(&mut self, id: UnitId, damage: i32) {
        let Some(unit) = self.units.get_mut(&id) else {
            return;
        };
        if !unit.is_alive() {
            return;
        }
        unit.health -= damage;
        if unit.health <= 0 {
            tracing::debug!(unit = id, owner = unit.owner, "soldier shot down");
            self.kill_unit(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::Rules;
    use crate::engine::game::tests::{game_with, ready_building};
    use crate::engine::path::Path;

    const MAP: &str = "1oooo\nooooo\nooo.2\n";

    /// Insert a released path for `owner` through the given grid cells.
    fn lay_path(game: &mut Game, owner: PlayerId, cells: &[(usize, usize)]) -> PathId {
        let tiles: Vec<TileId> = cells
            .iter()
            .map(|&(x, y)| game.world.tile_at(x, y).unwrap())
            .collect();
        let id = 100 + game.paths.len() as PathId;
        game.paths.insert(
            id,
            Path {
                id,
                owner,
                tiles,
                released: true,
            },
        );
        id
    }

    #[test]
    fn test_release_seeds_first_tile() {
        let mut game = game_with(MAP, Rules::default());
        let path = lay_path(&mut game, 1, &[(1, 1), (2, 1)]);
        let stats = game.rules().soldier(BuildingKind::Barracks);
        game.release_soldier(5, BuildingKind::Barracks, stats, path);
        let unit = game.units.values().next().unwrap();
        assert_eq!(unit.index, 1);
        assert_eq!(unit.pos, (1.5, 1.5));
        assert!(!unit.facing_left);
        let second = game.world.tile_at(2, 1).unwrap();
        assert_eq!(game.world.tile(second).units(), &[unit.id]);
    }

    #[test]
    fn test_soldier_walks_and_hits_enemy_castle_once() {
        let mut game = game_with(MAP, Rules::default());
        let castle = game.world.tile_at(4, 2).unwrap();
        let before = game.world.tile(castle).building().unwrap().health;
        let path = lay_path(&mut game, 1, &[(1, 1), (2, 1), (3, 1), (4, 2)]);
        let stats = game.rules().soldier(BuildingKind::Barracks);
        game.release_soldier(0, BuildingKind::Barracks, stats, path);

        for _ in 0..1000 {
            if game.units.is_empty() {
                break;
            }
            game.update_units();
        }
        assert!(game.units.is_empty());
        let b = game.world.tile(castle).building().unwrap();
        assert_eq!(b.health, before - stats.attack);
        assert!(b.damage_timer > 0);
        assert!(game.world.tiles().iter().all(|t| t.units().is_empty()));
    }

    #[test]
    fn test_soldier_falls_off_path_end() {
        let mut game = game_with(MAP, Rules::default());
        let path = lay_path(&mut game, 1, &[(1, 1), (2, 1)]);
        let stats = game.rules().soldier(BuildingKind::Barracks);
        game.release_soldier(0, BuildingKind::Barracks, stats, path);
        for _ in 0..200 {
            game.update_units();
        }
        assert!(game.units.is_empty());
    }

    #[test]
    fn test_destroyed_path_marks_soldier_dying() {
        let mut game = game_with(MAP, Rules::default());
        let path = lay_path(&mut game, 1, &[(1, 1), (2, 1), (3, 1)]);
        let stats = game.rules().soldier(BuildingKind::Barracks);
        game.release_soldier(0, BuildingKind::Barracks, stats, path);
        game.update_units();
        game.destroy_path(path);
        game.update_units();

        let unit = game.units.values().next().unwrap();
        assert!(!unit.is_alive());
        assert!(game.world.tiles().iter().all(|t| t.units().is_empty()));
        for _ in 0..=game.rules().dying_ticks {
            game.update_units();
        }
        assert!(game.units.is_empty());
    }

    #[test]
    fn test_tower_bullet_damages_enemy_once() {
        let mut game = game_with(MAP, Rules::default());
        let tower = game.world.tile_at(1, 1).unwrap();
        ready_building(&mut game, tower, BuildingKind::Tower, 1);
        let path = lay_path(&mut game, 2, &[(2, 1), (3, 1)]);
        let stats = game.rules().soldier(BuildingKind::Barracks);
        game.release_soldier(0, BuildingKind::Barracks, stats, path);
        let unit = *game.units.keys().next().unwrap();

        assert!(game.fire_tower(tower));
        assert_eq!(game.bullets.len(), 1);
        assert_eq!(game.bullets[0].target, unit);

        for _ in 0..game.rules().bullet_max_life {
            game.update_bullets();
        }
        assert!(game.bullets.is_empty());
        let damage = game.rules().stats(BuildingKind::Tower).damage;
        assert_eq!(game.units[&unit].health, stats.health - damage);
    }

    #[test]
    fn test_tower_ignores_friendly_and_distant_soldiers() {
        let mut game = game_with(MAP, Rules::default());
        let tower = game.world.tile_at(1, 1).unwrap();
        ready_building(&mut game, tower, BuildingKind::Tower, 1);
        let own = lay_path(&mut game, 1, &[(2, 1), (3, 1)]);
        let far = lay_path(&mut game, 2, &[(4, 0), (3, 0)]);
        let stats = game.rules().soldier(BuildingKind::Barracks);
        game.release_soldier(0, BuildingKind::Barracks, stats, own);
        game.release_soldier(0, BuildingKind::Barracks, stats, far);
        assert!(!game.fire_tower(tower));
        assert!(game.bullets.is_empty());
    }

    #[test]
    fn test_lethal_hit_starts_dying() {
        let mut game = game_with(MAP, Rules::default());
        let tower = game.world.tile_at(1, 1).unwrap();
        ready_building(&mut game, tower, BuildingKind::MagicTower, 1);
        let path = lay_path(&mut game, 2, &[(2, 1), (3, 1)]);
        let stats = SoldierStats {
            health: 10,
            attack: 1,
        };
        game.release_soldier(0, BuildingKind::Barracks, stats, path);
        assert!(game.fire_tower(tower));
        for _ in 0..game.rules().bullet_max_life {
            game.update_bullets();
        }
        let unit = game.units.values().next().unwrap();
        assert!(!unit.is_alive());
        // A dying soldier is no longer a target.
        assert!(!game.fire_tower(tower));
    }
}
