// Buildings: construction ramp, per-family behaviour and upgrade hand-over.
//
// Family behaviour lives in a static table of plain functions keyed by family.

use std::collections::VecDeque;

use super::config::{BuildingKind, Family, Rules, SoldierStats};
use super::game::Game;
use super::path::PathId;
use super::world::{PlayerId, TileId};

/// Family-specific state carried by a building.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildingState {
    Castle,
    Tower,
    Barracks {
        /// Trained soldiers waiting for a path.
        queue: VecDeque<SoldierStats>,
        path: Option<PathId>,
        can_release: bool,
    },
    Market,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub kind: BuildingKind,
    /// Fixed at creation.
    pub owner: PlayerId,
    pub health: i32,
    pub max_health: i32,
    pub built: bool,
    /// Ticks left before the next passive call.
    pub cooldown: u32,
    /// Ticks left on the hit flash.
    pub damage_timer: u32,
    pub state: BuildingState,
}

impl Building {
    /// A fresh, unbuilt building at zero health.
    pub fn new(kind: BuildingKind, owner: PlayerId, rules: &Rules) -> Self {
        let state = match kind.family() {
            Family::Castle => BuildingState::Castle,
            Family::Tower => BuildingState::Tower,
            Family::Barracks => BuildingState::Barracks {
                queue: VecDeque::new(),
                path: None,
                can_release: false,
            },
            Family::Market => BuildingState::Market,
        };
        Building {
            kind,
            owner,
            health: 0,
            max_health: rules.stats(kind).health,
            built: false,
            cooldown: 0,
            damage_timer: 0,
            state,
        }
    }

    /// A building that starts out complete (castles placed at game start).
    pub fn prebuilt(kind: BuildingKind, owner: PlayerId, rules: &Rules) -> Self {
        let mut building = Self::new(kind, owner, rules);
        building.health = building.max_health;
        building.built = true;
        building
    }

    pub fn family(&self) -> Family {
        self.kind.family()
    }

    /// Advance construction by `speed`. Returns true on the tick the building completes.
    pub fn construct(&mut self, speed: i32) -> bool {
        if self.built {
            return false;
        }
        self.health = (self.health + speed).min(self.max_health);
        if self.health >= self.max_health {
            self.built = true;
            self.cooldown = 0;
            return true;
        }
        false
    }

    /// Path this building dispatches soldiers onto, if it is a barracks.
    pub fn attached_path(&self) -> Option<PathId> {
        match &self.state {
            BuildingState::Barracks { path, .. } => *path,
            _ => None,
        }
    }

    pub fn can_release(&self) -> bool {
        matches!(&self.state, BuildingState::Barracks { can_release: true, path: Some(_), .. })
    }

    pub fn queued_soldiers(&self) -> usize {
        match &self.state {
            BuildingState::Barracks { queue, .. } => queue.len(),
            _ => 0,
        }
    }

    pub(crate) fn attach_path(&mut self, new_path: Option<PathId>) {
        if let BuildingState::Barracks {
            path, can_release, ..
        } = &mut self.state
        {
            *path = new_path;
            *can_release = new_path.is_some();
        }
    }

    /// Carry continuation state into the upgraded building.
    pub fn transfer_to(&self, upgraded: &mut Building) {
        if let (
            BuildingState::Barracks {
                path, can_release, ..
            },
            BuildingState::Barracks {
                path: new_path,
                can_release: new_release,
                ..
            },
        ) = (&self.state, &mut upgraded.state)
        {
            *new_path = *path;
            *new_release = *can_release;
        }
    }
}

/// How a building leaves its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Health reached zero.
    Destroyed,
    /// Replaced in place by its upgrade; the tile keeps its owner.
    Upgraded,
}

/// Per-family hooks. Every hook receives the tile the building stands on.
pub struct Behavior {
    /// Runs when the cooldown expires on a built building. Returns the next cooldown in ticks.
    pub passive: fn(&mut Game, TileId) -> u32,
    /// Runs when the owner presses action on the built building.
    pub active: fn(&mut Game, TileId),
    pub on_created: fn(&mut Game, &Building),
    pub on_teardown: fn(&mut Game, TileId, &Building, Teardown),
}

static CASTLE: Behavior = Behavior {
    passive: castle_passive,
    active: no_active,
    on_created: castle_created,
    on_teardown: castle_teardown,
};

static TOWER: Behavior = Behavior {
    passive: tower_passive,
    active: no_active,
    on_created: nothing_created,
    on_teardown: nothing_torn_down,
};

static BARRACKS: Behavior = Behavior {
    passive: barracks_passive,
    active: barracks_active,
    on_created: nothing_created,
    on_teardown: barracks_teardown,
};

static MARKET: Behavior = Behavior {
    passive: market_passive,
    active: no_active,
    on_created: market_created,
    on_teardown: market_teardown,
};

pub fn behavior(family: Family) -> &'static Behavior {
    match family {
        Family::Castle => &CASTLE,
        Family::Tower => &TOWER,
        Family::Barracks => &BARRACKS,
        Family::Market => &MARKET,
    }
}

fn no_active(game: &mut Game, tile: TileId) {
    tracing::debug!(tile, tick = game.tick, "building has no active ability");
}

fn nothing_created(_: &mut Game, _: &Building) {}

fn nothing_torn_down(_: &mut Game, _: TileId, _: &Building, _: Teardown) {}

// ── Castle ───────────────────────────────────────────────────────────

fn castle_passive(game: &mut Game, tile: TileId) -> u32 {
    if let Some(owner) = game.building_owner(tile) {
        let income = game.rules().stats(BuildingKind::Castle).income;
        game.pay(owner, income);
    }
    game.rules().secs_to_ticks(game.rules().passive_delay_secs)
}

fn castle_created(game: &mut Game, building: &Building) {
    let income = game.rules().stats(building.kind).income as f32;
    game.adjust_income(building.owner, income);
}

fn castle_teardown(game: &mut Game, tile: TileId, building: &Building, how: Teardown) {
    if how == Teardown::Destroyed {
        tracing::info!(player = building.owner, tile, "castle destroyed");
        game.eliminate(building.owner);
    }
}

// ── Tower ────────────────────────────────────────────────────────────

fn tower_passive(game: &mut Game, tile: TileId) -> u32 {
    let Some(kind) = game.building_kind(tile) else {
        return 1;
    };
    if game.fire_tower(tile) {
        game.rules().reload_ticks(kind)
    } else {
        1
    }
}

// ── Barracks ─────────────────────────────────────────────────────────

fn barracks_passive(game: &mut Game, tile: TileId) -> u32 {
    let cap = game.rules().barracks_queue_cap;
    let delay = game.rules().secs_to_ticks(game.rules().barracks_delay_secs);
    let Some(kind) = game.building_kind(tile) else {
        return delay;
    };
    let soldier = game.rules().soldier(kind);

    let released = match game.world.tile_mut(tile).building_mut() {
        Some(Building {
            state:
                BuildingState::Barracks {
                    queue,
                    path,
                    can_release,
                },
            ..
        }) => {
            if queue.len() < cap {
                queue.push_back(soldier);
            }
            match (*can_release, *path) {
                (true, Some(path)) => queue.pop_front().map(|s| (s, path)),
                _ => None,
            }
        }
        _ => None,
    };

    if let Some((stats, path)) = released {
        game.release_soldier(tile, kind, stats, path);
    }
    delay
}

fn barracks_active(game: &mut Game, tile: TileId) {
    if let Some(owner) = game.building_owner(tile) {
        if let Err(refusal) = game.start_path(owner, tile) {
            tracing::debug!(player = owner, tile, %refusal, "cannot start path");
        }
    }
}

fn barracks_teardown(game: &mut Game, tile: TileId, building: &Building, how: Teardown) {
    // The attached path and any path still under construction from here.
    if how == Teardown::Destroyed {
        game.destroy_paths_rooted_at(tile, building.owner);
    }
}

// ── Market ───────────────────────────────────────────────────────────

fn market_passive(game: &mut Game, tile: TileId) -> u32 {
    let Some(kind) = game.building_kind(tile) else {
        return 1;
    };
    if let Some(owner) = game.building_owner(tile) {
        let income = game.rules().stats(kind).income;
        game.pay(owner, income);
    }
    game.rules().payout_ticks(kind)
}

/// Gold per second a market-family tag yields: the payout times payouts per
/// second. Player income is displayed in the same unit as the castle's.
fn market_rate(game: &Game, kind: BuildingKind) -> f32 {
    let stats = game.rules().stats(kind);
    stats.income as f32 * stats.frequency
}

fn market_created(game: &mut Game, building: &Building) {
    let rate = market_rate(game, building.kind);
    game.adjust_income(building.owner, rate);
}

fn market_teardown(game: &mut Game, _tile: TileId, building: &Building, _how: Teardown) {
    let rate = market_rate(game, building.kind);
    game.adjust_income(building.owner, -rate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_ramp_is_monotonic() {
        let rules = Rules::default();
        let mut b = Building::new(BuildingKind::Barracks, 1, &rules);
        assert_eq!(b.health, 0);
        assert!(!b.built);
        let mut last = 0;
        let mut ticks = 0;
        while !b.built {
            let finished = b.construct(rules.building_speed);
            assert!(b.health >= last);
            if !finished {
                assert!(b.health < b.max_health);
            }
            last = b.health;
            ticks += 1;
        }
        assert_eq!(b.health, b.max_health);
        assert_eq!(ticks, b.max_health / rules.building_speed);
        assert!(!b.construct(rules.building_speed));
    }

    #[test]
    fn test_construction_clamps_to_max() {
        let rules = Rules::default();
        let mut b = Building::new(BuildingKind::Tower, 1, &rules);
        assert!(b.construct(1000));
        assert_eq!(b.health, b.max_health);
    }

    #[test]
    fn test_transfer_carries_barracks_path() {
        let rules = Rules::default();
        let mut old = Building::prebuilt(BuildingKind::Barracks, 2, &rules);
        old.attach_path(Some(9));
        let mut upgraded = Building::new(BuildingKind::ShieldsBarracks, 2, &rules);
        old.transfer_to(&mut upgraded);
        assert_eq!(upgraded.attached_path(), Some(9));
        assert!(upgraded.can_release());
        assert!(!upgraded.built);
        assert_eq!(upgraded.health, 0);
    }

    #[test]
    fn test_non_barracks_have_no_path() {
        let rules = Rules::default();
        let mut market = Building::prebuilt(BuildingKind::Market, 1, &rules);
        market.attach_path(Some(3));
        assert_eq!(market.attached_path(), None);
        assert!(!market.can_release());
        assert_eq!(market.queued_soldiers(), 0);
    }
}
