// Game rules: building statistics, soldier statistics, the upgrade graph and timing.
//
// Loaded once at startup (defaults or a JSON file) and shared read-only as `Arc<Rules>`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every building tag the game knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    Castle,
    Tower,
    SniperTower,
    MagicTower,
    Barracks,
    SwordsBarracks,
    ShieldsBarracks,
    Market,
    Mine,
    Bank,
}

/// Behaviour family of a building. Tags in the same family share passive/active logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Castle,
    Tower,
    Barracks,
    Market,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 10] = [
        BuildingKind::Castle,
        BuildingKind::Tower,
        BuildingKind::SniperTower,
        BuildingKind::MagicTower,
        BuildingKind::Barracks,
        BuildingKind::SwordsBarracks,
        BuildingKind::ShieldsBarracks,
        BuildingKind::Market,
        BuildingKind::Mine,
        BuildingKind::Bank,
    ];

    pub fn family(self) -> Family {
        match self {
            BuildingKind::Castle => Family::Castle,
            BuildingKind::Tower | BuildingKind::SniperTower | BuildingKind::MagicTower => {
                Family::Tower
            }
            BuildingKind::Barracks | BuildingKind::SwordsBarracks | BuildingKind::ShieldsBarracks => {
                Family::Barracks
            }
            BuildingKind::Market | BuildingKind::Mine | BuildingKind::Bank => Family::Market,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BuildingKind::Castle => "castle",
            BuildingKind::Tower => "tower",
            BuildingKind::SniperTower => "sniper_tower",
            BuildingKind::MagicTower => "magic_tower",
            BuildingKind::Barracks => "barracks",
            BuildingKind::SwordsBarracks => "swords_barracks",
            BuildingKind::ShieldsBarracks => "shields_barracks",
            BuildingKind::Market => "market",
            BuildingKind::Mine => "mine",
            BuildingKind::Bank => "bank",
        }
    }
}

/// Per-tag statistics. Fields that do not apply to a family stay at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BuildingStats {
    pub health: i32,
    pub cost: i32,
    /// Gold paid per payout (castle, market family).
    pub income: i32,
    /// Payouts per second (market family).
    pub frequency: f32,
    /// Bullet damage (tower family).
    pub damage: i32,
    /// Shots per second (tower family).
    pub fire_rate: f32,
    /// Squared targeting distance in tile units (tower family).
    pub range_sq: f32,
}

/// Statistics of the soldier a barracks tag trains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoldierStats {
    pub health: i32,
    pub attack: i32,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read rules file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rules JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no statistics for building '{0}'")]
    MissingStats(&'static str),
    #[error("no soldier statistics for barracks '{0}'")]
    MissingSoldier(&'static str),
    #[error("'{0}' lists itself or a castle as an upgrade")]
    BadUpgrade(&'static str),
    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

/// Immutable rule set consulted by the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    pub ticks_per_second: u32,
    /// Health gained per tick while a building is under construction.
    pub building_speed: i32,
    pub starting_gold: i32,
    pub max_gold: i32,
    pub paths_can_cross: bool,
    /// Seconds between passive calls for families without their own rate.
    pub passive_delay_secs: f32,
    pub barracks_delay_secs: f32,
    pub barracks_queue_cap: usize,
    /// Tiles per tick.
    pub soldier_speed: f32,
    /// Tiles per tick.
    pub bullet_speed: f32,
    /// Ticks before a bullet detonates regardless of position.
    pub bullet_max_life: u32,
    /// Squared distance at which a bullet counts as arrived.
    pub bullet_hit_dist_sq: f32,
    /// Ticks a dying soldier lingers before removal.
    pub dying_ticks: u32,
    /// Ticks the damage flash stays on a hit building.
    pub damage_flash_ticks: u32,
    pub buildings: BTreeMap<BuildingKind, BuildingStats>,
    pub soldiers: BTreeMap<BuildingKind, SoldierStats>,
    pub upgrades: BTreeMap<BuildingKind, Vec<BuildingKind>>,
}

impl Default for Rules {
    fn default() -> Self {
        let mut buildings = BTreeMap::new();
        let basic = |health, cost| BuildingStats {
            health,
            cost,
            ..BuildingStats::default()
        };
        buildings.insert(
            BuildingKind::Castle,
            BuildingStats {
                income: 2,
                ..basic(100, 0)
            },
        );
        let tower = |damage, fire_rate, range_sq| BuildingStats {
            damage,
            fire_rate,
            range_sq,
            ..basic(60, 10)
        };
        buildings.insert(BuildingKind::Tower, tower(5, 8.0, 2.5));
        buildings.insert(BuildingKind::SniperTower, tower(10, 1.0, 10.0));
        buildings.insert(BuildingKind::MagicTower, tower(30, 2.0, 1.5));
        for kind in [
            BuildingKind::Barracks,
            BuildingKind::SwordsBarracks,
            BuildingKind::ShieldsBarracks,
        ] {
            buildings.insert(kind, basic(40, 10));
        }
        let market = |income, frequency| BuildingStats {
            income,
            frequency,
            ..basic(40, 10)
        };
        buildings.insert(BuildingKind::Market, market(3, 1.0));
        buildings.insert(BuildingKind::Mine, market(50, 0.1));
        buildings.insert(BuildingKind::Bank, market(2, 0.6));

        let mut soldiers = BTreeMap::new();
        soldiers.insert(BuildingKind::Barracks, SoldierStats { health: 80, attack: 20 });
        soldiers.insert(BuildingKind::SwordsBarracks, SoldierStats { health: 80, attack: 40 });
        soldiers.insert(BuildingKind::ShieldsBarracks, SoldierStats { health: 160, attack: 20 });

        let mut upgrades = BTreeMap::new();
        upgrades.insert(
            BuildingKind::Tower,
            vec![BuildingKind::SniperTower, BuildingKind::MagicTower],
        );
        upgrades.insert(
            BuildingKind::Barracks,
            vec![BuildingKind::SwordsBarracks, BuildingKind::ShieldsBarracks],
        );
        upgrades.insert(BuildingKind::Market, vec![BuildingKind::Mine, BuildingKind::Bank]);

        Rules {
            ticks_per_second: 60,
            building_speed: 1,
            starting_gold: 20,
            max_gold: 9999,
            paths_can_cross: true,
            passive_delay_secs: 1.0,
            barracks_delay_secs: 2.0,
            barracks_queue_cap: 3,
            soldier_speed: 0.02,
            bullet_speed: 0.1,
            bullet_max_life: 20,
            bullet_hit_dist_sq: 0.01,
            dying_ticks: 10,
            damage_flash_ticks: 10,
            buildings,
            soldiers,
            upgrades,
        }
    }
}

impl Rules {
    /// Load rules from a JSON file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, RulesError> {
        let rules: Rules = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check that every lookup the simulation performs will succeed.
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.ticks_per_second == 0 {
            return Err(RulesError::NotPositive("ticks_per_second"));
        }
        if self.building_speed <= 0 {
            return Err(RulesError::NotPositive("building_speed"));
        }
        if self.soldier_speed <= 0.0 {
            return Err(RulesError::NotPositive("soldier_speed"));
        }
        if self.bullet_speed <= 0.0 {
            return Err(RulesError::NotPositive("bullet_speed"));
        }
        for kind in BuildingKind::ALL {
            let stats = self
                .buildings
                .get(&kind)
                .ok_or(RulesError::MissingStats(kind.label()))?;
            if stats.health <= 0 {
                return Err(RulesError::NotPositive("building health"));
            }
            match kind.family() {
                Family::Barracks if !self.soldiers.contains_key(&kind) => {
                    return Err(RulesError::MissingSoldier(kind.label()));
                }
                Family::Market if stats.frequency <= 0.0 => {
                    return Err(RulesError::NotPositive("market frequency"));
                }
                Family::Tower if stats.fire_rate <= 0.0 => {
                    return Err(RulesError::NotPositive("tower fire_rate"));
                }
                _ => {}
            }
        }
        for (from, targets) in &self.upgrades {
            if targets
                .iter()
                .any(|t| t == from || *t == BuildingKind::Castle)
            {
                return Err(RulesError::BadUpgrade(from.label()));
            }
        }
        Ok(())
    }

    /// Statistics for a tag. Only valid on a validated rule set.
    pub fn stats(&self, kind: BuildingKind) -> &BuildingStats {
        &self.buildings[&kind]
    }

    pub fn soldier(&self, barracks: BuildingKind) -> SoldierStats {
        self.soldiers[&barracks]
    }

    /// Tags a built building of `kind` may be upgraded into.
    pub fn upgrades_for(&self, kind: BuildingKind) -> &[BuildingKind] {
        self.upgrades.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Convert a duration in seconds into whole ticks, never less than one.
    pub fn secs_to_ticks(&self, secs: f32) -> u32 {
        ((secs * self.ticks_per_second as f32).round() as u32).max(1)
    }

    /// Ticks between market payouts for a market-family tag.
    pub fn payout_ticks(&self, kind: BuildingKind) -> u32 {
        self.secs_to_ticks(1.0 / self.stats(kind).frequency)
    }

    /// Ticks a tower waits after firing.
    pub fn reload_ticks(&self, kind: BuildingKind) -> u32 {
        self.secs_to_ticks(1.0 / self.stats(kind).fire_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_validate() {
        let rules = Rules::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.stats(BuildingKind::Barracks).cost, 10);
        assert_eq!(rules.stats(BuildingKind::Castle).health, 100);
    }

    #[test]
    fn test_upgrade_graph() {
        let rules = Rules::default();
        assert_eq!(
            rules.upgrades_for(BuildingKind::Tower),
            &[BuildingKind::SniperTower, BuildingKind::MagicTower]
        );
        assert!(rules.upgrades_for(BuildingKind::Castle).is_empty());
        assert!(rules.upgrades_for(BuildingKind::Mine).is_empty());
    }

    #[test]
    fn test_tick_conversions() {
        let rules = Rules::default();
        assert_eq!(rules.secs_to_ticks(1.0), 60);
        assert_eq!(rules.secs_to_ticks(0.0), 1);
        assert_eq!(rules.payout_ticks(BuildingKind::Mine), 600);
        assert_eq!(rules.payout_ticks(BuildingKind::Market), 60);
        assert_eq!(rules.reload_ticks(BuildingKind::Tower), 8);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let rules = Rules::from_json(r#"{"starting_gold": 500, "paths_can_cross": false}"#).unwrap();
        assert_eq!(rules.starting_gold, 500);
        assert!(!rules.paths_can_cross);
        assert_eq!(rules.ticks_per_second, 60);
        assert_eq!(rules.stats(BuildingKind::Mine).income, 50);
    }

    #[test]
    fn test_json_missing_building_rejected() {
        let err = Rules::from_json(r#"{"buildings": {"castle": {"health": 10}}}"#).unwrap_err();
        assert!(matches!(err, RulesError::MissingStats(_)));
    }

    #[test]
    fn test_self_upgrade_rejected() {
        let mut rules = Rules::default();
        rules
            .upgrades
            .insert(BuildingKind::Bank, vec![BuildingKind::Bank]);
        assert!(matches!(rules.validate(), Err(RulesError::BadUpgrade("bank"))));
    }
}
