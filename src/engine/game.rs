use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::building::{behavior, Building, Teardown};
use super::config::{BuildingKind, Rules};
use super::map::MapLayout;
use super::path::{Path, PathId};
use super::player::Player;
use super::unit::{Bullet, Soldier, UnitId};
use super::world::{PlayerId, TileId, World};
use super::Refusal;
use crate::metrics;

/// Top-level game state and tick loop.
///
/// Every collection is keyed or ordered by id so that two games fed the same
/// commands evolve identically.
#[derive(Debug, Clone)]
pub struct Game {
    pub(crate) rules: Arc<Rules>,
    pub world: World,
    pub players: BTreeMap<PlayerId, Player>,
    pub paths: BTreeMap<PathId, Path>,
    pub units: BTreeMap<UnitId, Soldier>,
    pub bullets: Vec<Bullet>,
    pub tick: u64,
    pub(crate) next_path_id: PathId,
    pub(crate) next_unit_id: UnitId,
    pub winner: Option<PlayerId>,
    pub is_over: bool,
    /// Duration of the last tick in microseconds.
    pub last_tick_us: u64,
}

impl Game {
    /// Set up a fresh game: one player per starting cell, each with a finished
    /// castle on it and the cursor resting there.
    pub fn new(layout: &MapLayout, rules: Arc<Rules>) -> Self {
        let world = World::from_layout(layout);
        let starts = world.starts().to_vec();
        let mut game = Game {
            rules,
            world,
            players: BTreeMap::new(),
            paths: BTreeMap::new(),
            units: BTreeMap::new(),
            bullets: Vec::new(),
            tick: 0,
            next_path_id: 1,
            next_unit_id: 1,
            winner: None,
            is_over: false,
            last_tick_us: 0,
        };

        for &(player, start) in &starts {
            game.players
                .insert(player, Player::new(player, start, game.rules.starting_gold));
        }
        for (player, tile) in starts {
            // A neighbouring castle may already have claimed this start tile.
            game.world.set_owner(tile, Some(player));
            let castle = Building::prebuilt(BuildingKind::Castle, player, &game.rules);
            if let Err(refusal) = game.place_building(tile, castle) {
                tracing::error!(player, tile, %refusal, "could not place starting castle");
            }
        }
        tracing::info!(
            players = game.players.len(),
            tiles = game.world.len(),
            "game created"
        );
        game
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn shared_rules(&self) -> Arc<Rules> {
        Arc::clone(&self.rules)
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn building_owner(&self, tile: TileId) -> Option<PlayerId> {
        self.world.tile(tile).building().map(|b| b.owner)
    }

    pub fn building_kind(&self, tile: TileId) -> Option<BuildingKind> {
        self.world.tile(tile).building().map(|b| b.kind)
    }

    /// Credit gold, capped at the rule maximum.
    pub fn pay(&mut self, player: PlayerId, amount: i32) {
        let max = self.rules.max_gold;
        if let Some(p) = self.players.get_mut(&player) {
            p.add_gold(amount, max);
        }
    }

    /// Shift the displayed income rate. Never affects the gold actually paid.
    pub fn adjust_income(&mut self, player: PlayerId, delta: f32) {
        if let Some(p) = self.players.get_mut(&player) {
            p.income += delta;
        }
    }

    /// Mark a player as lost. A path they were drawing is thrown away.
    pub fn eliminate(&mut self, player: PlayerId) {
        let drawing = match self.players.get(&player) {
            Some(p) if !p.lost => p.builder.path,
            _ => return,
        };
        if let Some(path) = drawing {
            if self.paths.get(&path).is_some_and(|p| !p.released) {
                self.destroy_path(path);
            }
        }
        if let Some(p) = self.players.get_mut(&player) {
            p.lose();
        }
        metrics::PLAYERS_ELIMINATED_TOTAL.inc();
        tracing::info!(player, tick = self.tick, "player eliminated");
    }

    // ── Building lifecycle ───────────────────────────────────────────

    /// Put a building on a tile the owner controls and run its creation hook.
    pub fn place_building(&mut self, tile: TileId, building: Building) -> Result<(), Refusal> {
        self.world.can_build(tile, building.owner)?;
        (behavior(building.family()).on_created)(self, &building);
        metrics::BUILDINGS_STARTED_TOTAL
            .with_label_values(&[building.kind.label()])
            .inc();
        self.world.place_building(tile, building)
    }

    /// Buy a new building: the tile must be free and controlled by the player,
    /// and the player must afford it. Gold is only taken once placement succeeded.
    pub fn build(&mut self, player: PlayerId, tile: TileId, kind: BuildingKind) -> Result<(), Refusal> {
        self.world.can_build(tile, player)?;
        let cost = self.rules.stats(kind).cost;
        self.players
            .get(&player)
            .ok_or(Refusal::UnknownPlayer(player))?
            .can_afford(cost)?;
        let building = Building::new(kind, player, &self.rules);
        self.place_building(tile, building)?;
        if let Some(p) = self.players.get_mut(&player) {
            p.spend(cost)?;
        }
        tracing::debug!(player, tile, kind = kind.label(), cost, "building started");
        Ok(())
    }

    /// Buy an upgrade for a finished building the player owns.
    pub fn buy_upgrade(&mut self, player: PlayerId, tile: TileId, to: BuildingKind) -> Result<(), Refusal> {
        let from = {
            let b = self.world.tile(tile).building().ok_or(Refusal::NoBuilding)?;
            if b.owner != player {
                return Err(Refusal::NotOwner);
            }
            if !b.built {
                return Err(Refusal::UnderConstruction);
            }
            b.kind
        };
        if !self.rules.upgrades_for(from).contains(&to) {
            return Err(Refusal::IllegalUpgrade { from, to });
        }
        let cost = self.rules.stats(to).cost;
        self.players
            .get_mut(&player)
            .ok_or(Refusal::UnknownPlayer(player))?
            .spend(cost)?;
        self.upgrade_building(tile, to);
        tracing::debug!(player, tile, from = from.label(), to = to.label(), "building upgraded");
        Ok(())
    }

    /// Replace a building in place with a fresh, unbuilt one of tag `to`.
    /// Tile ownership is untouched; barracks keep their path.
    pub fn upgrade_building(&mut self, tile: TileId, to: BuildingKind) {
        let Some(old) = self.world.tile(tile).building().cloned() else {
            return;
        };
        (behavior(old.family()).on_teardown)(self, tile, &old, Teardown::Upgraded);
        let mut upgraded = Building::new(to, old.owner, &self.rules);
        old.transfer_to(&mut upgraded);
        (behavior(upgraded.family()).on_created)(self, &upgraded);
        metrics::BUILDINGS_STARTED_TOTAL
            .with_label_values(&[to.label()])
            .inc();
        self.world.replace_building(tile, upgraded);
    }

    /// Remove a building for good and run its destruction hook.
    pub fn destroy_building(&mut self, tile: TileId) {
        let Some(building) = self.world.remove_building(tile) else {
            return;
        };
        metrics::BUILDINGS_DESTROYED_TOTAL
            .with_label_values(&[building.kind.label()])
            .inc();
        tracing::debug!(tile, owner = building.owner, kind = building.kind.label(), "building destroyed");
        (behavior(building.family()).on_teardown)(self, tile, &building, Teardown::Destroyed);
    }

    /// Apply damage to the building on `tile`, destroying it at zero health.
    pub fn attack_building(&mut self, tile: TileId, damage: i32) {
        let flash = self.rules.damage_flash_ticks;
        let Some(b) = self.world.tile_mut(tile).building_mut() else {
            return;
        };
        b.health -= damage;
        b.damage_timer = flash;
        if b.health <= 0 {
            self.destroy_building(tile);
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────

    /// Run one game tick: tiles, units, bullets, buildings, then the win check.
    pub fn tick(&mut self) {
        if self.is_over {
            return;
        }
        let tick_start = Instant::now();
        self.tick += 1;

        // Tiles carry no per-tick behaviour yet.
        self.update_units();
        self.update_bullets();
        self.update_buildings();
        self.check_winner();

        let total_us = tick_start.elapsed().as_micros() as u64;
        self.last_tick_us = total_us;
        metrics::TICKS_TOTAL.inc();
        metrics::LIVE_UNITS.set(self.units.len() as i64);
        metrics::GAME_TICK_DURATION_MS.observe(total_us as f64 / 1000.0);

        let budget_us = 1_000_000 / u64::from(self.rules.ticks_per_second.max(1));
        if total_us > budget_us / 2 {
            tracing::warn!(
                tick = self.tick,
                total_us,
                units = self.units.len(),
                bullets = self.bullets.len(),
                "tick exceeded half its budget"
            );
        }
    }

    /// Construction ramp for unbuilt buildings, passive trigger for built ones,
    /// in ascending tile order.
    fn update_buildings(&mut self) {
        let speed = self.rules.building_speed;
        for tile in 0..self.world.len() {
            let family = {
                let Some(b) = self.world.tile_mut(tile).building_mut() else {
                    continue;
                };
                b.damage_timer = b.damage_timer.saturating_sub(1);
                if !b.built {
                    if b.construct(speed) {
                        tracing::debug!(tile, owner = b.owner, kind = b.kind.label(), "construction finished");
                    }
                    continue;
                }
                if b.cooldown > 0 {
                    b.cooldown -= 1;
                    continue;
                }
                b.family()
            };
            let delay = (behavior(family).passive)(self, tile);
            if let Some(b) = self.world.tile_mut(tile).building_mut() {
                b.cooldown = delay.saturating_sub(1);
            }
        }
    }

    /// The game ends once at most one player is still in it.
    pub fn check_winner(&mut self) -> Option<PlayerId> {
        if self.is_over {
            return self.winner;
        }
        let mut alive = self.players.values().filter(|p| !p.lost).map(|p| p.id);
        let first = alive.next();
        if alive.next().is_none() {
            self.is_over = true;
            self.winner = first;
            tracing::info!(winner = ?first, tick = self.tick, "game over");
        }
        self.winner
    }
}
