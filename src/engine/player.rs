use serde::{Deserialize, Serialize};

use super::path::PathId;
use super::world::{Direction, PlayerId, TileId};
use super::Refusal;

/// Interaction mode of a player. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Normal,
    BuildMenu,
    UpgradeMenu,
    PathBuilding,
}

/// Tracks the path a player is currently drawing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathBuilder {
    pub path: Option<PathId>,
    /// Directions of every extension, most recent last.
    pub steps: Vec<Direction>,
}

impl PathBuilder {
    pub fn reset(&mut self) {
        self.path = None;
        self.steps.clear();
    }
}

/// A participant. Identity is fixed; gold, cursor and mode change as the game runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub gold: i32,
    /// Displayed gold per second. The real income is whatever the buildings pay.
    pub income: f32,
    pub cursor: TileId,
    pub mode: Mode,
    pub lost: bool,
    pub builder: PathBuilder,
}

impl Player {
    pub fn new(id: PlayerId, cursor: TileId, gold: i32) -> Self {
        Player {
            id,
            gold,
            income: 0.0,
            cursor,
            mode: Mode::Normal,
            lost: false,
            builder: PathBuilder::default(),
        }
    }

    pub fn add_gold(&mut self, amount: i32, max_gold: i32) {
        self.gold = (self.gold + amount).min(max_gold);
    }

    /// Check funds without spending them.
    pub fn can_afford(&self, cost: i32) -> Result<(), Refusal> {
        if self.gold < cost {
            return Err(Refusal::InsufficientGold {
                need: cost,
                have: self.gold,
            });
        }
        Ok(())
    }

    pub fn spend(&mut self, cost: i32) -> Result<(), Refusal> {
        self.can_afford(cost)?;
        self.gold -= cost;
        Ok(())
    }

    pub fn lose(&mut self) {
        self.lost = true;
        self.mode = Mode::Normal;
        self.builder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spend_checks_funds() {
        let mut p = Player::new(1, 0, 15);
        assert_eq!(
            p.spend(20),
            Err(Refusal::InsufficientGold { need: 20, have: 15 })
        );
        assert_eq!(p.gold, 15);
        assert!(p.spend(10).is_ok());
        assert_eq!(p.gold, 5);
    }

    #[test]
    fn test_gold_is_capped() {
        let mut p = Player::new(1, 0, 9990);
        p.add_gold(50, 9999);
        assert_eq!(p.gold, 9999);
    }

    #[test]
    fn test_lose_resets_mode() {
        let mut p = Player::new(2, 4, 0);
        p.mode = Mode::PathBuilding;
        p.builder.path = Some(3);
        p.lose();
        assert!(p.lost);
        assert_eq!(p.mode, Mode::Normal);
        assert_eq!(p.builder.path, None);
    }
}
