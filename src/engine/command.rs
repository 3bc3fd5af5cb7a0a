// Player commands and the mode-driven interpreter that applies them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::building::behavior;
use super::config::{BuildingKind, Family};
use super::game::Game;
use super::player::Mode;
use super::world::{Direction, PlayerId, TileId};
use super::Refusal;
use crate::metrics;

/// A discrete player input. Travels on the wire as its label, e.g. `"up-left"`
/// or `"build-tower"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Command {
    Move(Direction),
    Action,
    Upgrade,
    BuildTower,
    BuildBarracks,
    BuildMarket,
    StartPath,
}

impl Command {
    pub fn label(self) -> &'static str {
        match self {
            Command::Move(dir) => dir.label(),
            Command::Action => "action",
            Command::Upgrade => "upgrade",
            Command::BuildTower => "build-tower",
            Command::BuildBarracks => "build-barracks",
            Command::BuildMarket => "build-market",
            Command::StartPath => "start-path",
        }
    }

    /// Building tag a build hotkey stands for.
    fn hotkey_kind(self) -> Option<BuildingKind> {
        match self {
            Command::BuildTower => Some(BuildingKind::Tower),
            Command::BuildBarracks => Some(BuildingKind::Barracks),
            Command::BuildMarket => Some(BuildingKind::Market),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(dir) = Direction::from_label(s) {
            return Ok(Command::Move(dir));
        }
        match s {
            "action" => Ok(Command::Action),
            "upgrade" => Ok(Command::Upgrade),
            "build-tower" => Ok(Command::BuildTower),
            "build-barracks" => Ok(Command::BuildBarracks),
            "build-market" => Ok(Command::BuildMarket),
            "start-path" => Ok(Command::StartPath),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

impl TryFrom<String> for Command {
    type Error = UnknownCommand;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Command> for String {
    fn from(cmd: Command) -> Self {
        cmd.label().to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Build menu: up, left and right pick a tag, down closes the menu.
fn build_menu_choice(dir: Direction) -> Option<BuildingKind> {
    match dir {
        Direction::Up => Some(BuildingKind::Tower),
        Direction::Left => Some(BuildingKind::Barracks),
        Direction::Right => Some(BuildingKind::Market),
        _ => None,
    }
}

impl Game {
    /// Apply one command from `player`. Refused commands change nothing; the
    /// refusal is logged and handed back for callers that care.
    pub fn execute_command(&mut self, player: PlayerId, command: Command) -> Result<(), Refusal> {
        let result = self.interpret(player, command);
        match &result {
            Ok(()) => {
                metrics::COMMANDS_TOTAL.with_label_values(&["applied"]).inc();
                tracing::trace!(player, %command, "command applied");
            }
            Err(refusal) => {
                metrics::COMMANDS_TOTAL.with_label_values(&["refused"]).inc();
                tracing::debug!(player, %command, %refusal, "command refused");
            }
        }
        result
    }

    fn interpret(&mut self, player: PlayerId, command: Command) -> Result<(), Refusal> {
        if self.is_over {
            return Err(Refusal::GameOver);
        }
        let p = self.players.get(&player).ok_or(Refusal::UnknownPlayer(player))?;
        if p.lost {
            return Err(Refusal::PlayerLost(player));
        }
        let (mode, cursor) = (p.mode, p.cursor);

        match mode {
            Mode::Normal => self.normal_command(player, cursor, command),
            Mode::BuildMenu => self.build_menu_command(player, cursor, command),
            Mode::UpgradeMenu => self.upgrade_menu_command(player, cursor, command),
            Mode::PathBuilding => match command {
                Command::Move(dir) => self.step_path(player, dir),
                Command::Action => self.finish_path(player),
                Command::Upgrade => self.cancel_path(player),
                _ => Err(Refusal::WrongMode),
            },
        }
    }

    fn set_mode(&mut self, player: PlayerId, mode: Mode) {
        if let Some(p) = self.players.get_mut(&player) {
            p.mode = mode;
        }
    }

    fn normal_command(&mut self, player: PlayerId, cursor: TileId, command: Command) -> Result<(), Refusal> {
        match command {
            Command::Move(dir) => {
                let next = self.world.neighbour(cursor, dir).ok_or(Refusal::OffGrid)?;
                if let Some(p) = self.players.get_mut(&player) {
                    p.cursor = next;
                }
                Ok(())
            }
            Command::Action => {
                let tile = self.world.tile(cursor);
                if tile.owner() != Some(player) {
                    return Err(Refusal::NotOwner);
                }
                match tile.building().map(|b| (b.built, b.family())) {
                    None => {
                        self.set_mode(player, Mode::BuildMenu);
                        Ok(())
                    }
                    Some((false, _)) => Err(Refusal::UnderConstruction),
                    Some((true, Family::Barracks)) => self.start_path(player, cursor),
                    Some((true, family)) => {
                        (behavior(family).active)(self, cursor);
                        Ok(())
                    }
                }
            }
            Command::Upgrade => {
                let b = self.world.tile(cursor).building().ok_or(Refusal::NoBuilding)?;
                if b.owner != player {
                    return Err(Refusal::NotOwner);
                }
                if !b.built {
                    return Err(Refusal::UnderConstruction);
                }
                if self.rules.upgrades_for(b.kind).is_empty() {
                    return Err(Refusal::NotUpgradable(b.kind));
                }
                self.set_mode(player, Mode::UpgradeMenu);
                Ok(())
            }
            Command::BuildTower | Command::BuildBarracks | Command::BuildMarket => {
                let kind = command.hotkey_kind().ok_or(Refusal::WrongMode)?;
                self.build(player, cursor, kind)
            }
            Command::StartPath => self.start_path(player, cursor),
        }
    }

    fn build_menu_command(&mut self, player: PlayerId, cursor: TileId, command: Command) -> Result<(), Refusal> {
        let kind = match command {
            Command::Move(Direction::Down) | Command::Action | Command::Upgrade => {
                self.set_mode(player, Mode::Normal);
                return Ok(());
            }
            Command::Move(dir) => build_menu_choice(dir).ok_or(Refusal::WrongMode)?,
            other => other.hotkey_kind().ok_or(Refusal::WrongMode)?,
        };
        self.set_mode(player, Mode::Normal);
        self.build(player, cursor, kind)
    }

    fn upgrade_menu_command(&mut self, player: PlayerId, cursor: TileId, command: Command) -> Result<(), Refusal> {
        let slot = match command {
            Command::Move(Direction::Left) => 0,
            Command::Move(Direction::Right) => 1,
            Command::Move(Direction::Down) | Command::Action | Command::Upgrade => {
                self.set_mode(player, Mode::Normal);
                return Ok(());
            }
            _ => return Err(Refusal::WrongMode),
        };
        self.set_mode(player, Mode::Normal);
        let from = self.building_kind(cursor).ok_or(Refusal::NoBuilding)?;
        let to = *self
            .rules
            .upgrades_for(from)
            .get(slot)
            .ok_or(Refusal::NotUpgradable(from))?;
        self.buy_upgrade(player, cursor, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::Rules;
    use crate::engine::game::tests::{game_with, ready_building};

    const MAP: &str = "1oooo\nooooo\nooo.2\n";

    fn cursor_to(game: &mut Game, player: PlayerId, x: usize, y: usize) {
        let tile = game.world.tile_at(x, y).unwrap();
        game.players.get_mut(&player).unwrap().cursor = tile;
    }

    #[test]
    fn test_labels_parse_back() {
        let all = Direction::ALL
            .into_iter()
            .map(Command::Move)
            .chain([
                Command::Action,
                Command::Upgrade,
                Command::BuildTower,
                Command::BuildBarracks,
                Command::BuildMarket,
                Command::StartPath,
            ]);
        for cmd in all {
            assert_eq!(cmd.label().parse::<Command>(), Ok(cmd));
        }
        assert_eq!(
            "dance".parse::<Command>(),
            Err(UnknownCommand("dance".into()))
        );
    }

    #[test]
    fn test_command_serializes_as_label() {
        let json = serde_json::to_string(&Command::Move(Direction::UpLeft)).unwrap();
        assert_eq!(json, "\"up-left\"");
        let cmd: Command = serde_json::from_str("\"build-market\"").unwrap();
        assert_eq!(cmd, Command::BuildMarket);
        assert!(serde_json::from_str::<Command>("\"fly\"").is_err());
    }

    #[test]
    fn test_cursor_moves_and_stops_at_edge() {
        let mut game = game_with(MAP, Rules::default());
        let start = game.players[&1].cursor;
        assert_eq!(
            game.execute_command(1, Command::Move(Direction::Up)),
            Err(Refusal::OffGrid)
        );
        assert_eq!(game.players[&1].cursor, start);
        game.execute_command(1, Command::Move(Direction::DownRight)).unwrap();
        assert_eq!(game.players[&1].cursor, game.world.tile_at(1, 1).unwrap());
    }

    #[test]
    fn test_build_menu_flow() {
        let mut game = game_with(MAP, Rules::default());
        cursor_to(&mut game, 1, 1, 0);
        game.execute_command(1, Command::Action).unwrap();
        assert_eq!(game.players[&1].mode, Mode::BuildMenu);
        // Diagonals pick nothing and keep the menu open.
        assert_eq!(
            game.execute_command(1, Command::Move(Direction::UpLeft)),
            Err(Refusal::WrongMode)
        );
        assert_eq!(game.players[&1].mode, Mode::BuildMenu);
        game.execute_command(1, Command::Move(Direction::Up)).unwrap();
        assert_eq!(game.players[&1].mode, Mode::Normal);
        let tile = game.world.tile_at(1, 0).unwrap();
        assert_eq!(game.building_kind(tile), Some(BuildingKind::Tower));
        assert_eq!(game.players[&1].gold, 10);
    }

    #[test]
    fn test_build_menu_cancel() {
        let mut game = game_with(MAP, Rules::default());
        cursor_to(&mut game, 1, 1, 0);
        game.execute_command(1, Command::Action).unwrap();
        game.execute_command(1, Command::Move(Direction::Down)).unwrap();
        assert_eq!(game.players[&1].mode, Mode::Normal);
        assert!(game.world.tile(game.players[&1].cursor).building().is_none());
    }

    #[test]
    fn test_foreign_tile_build_is_a_silent_no_op() {
        let mut game = game_with(MAP, Rules::default());
        cursor_to(&mut game, 1, 3, 1);
        let before = game.snapshot();
        assert_eq!(
            game.execute_command(1, Command::BuildTower),
            Err(Refusal::NotOwner)
        );
        assert_eq!(
            game.execute_command(1, Command::Action),
            Err(Refusal::NotOwner)
        );
        assert_eq!(game.snapshot(), before);
    }

    #[test]
    fn test_insufficient_gold_spends_nothing() {
        let mut game = game_with(MAP, Rules::default());
        game.players.get_mut(&1).unwrap().gold = 9;
        cursor_to(&mut game, 1, 1, 0);
        assert_eq!(
            game.execute_command(1, Command::BuildBarracks),
            Err(Refusal::InsufficientGold { need: 10, have: 9 })
        );
        assert_eq!(game.players[&1].gold, 9);
        assert!(game.world.tile(game.players[&1].cursor).building().is_none());
    }

    #[test]
    fn test_upgrade_menu_flow() {
        let mut game = game_with(MAP, Rules::default());
        let tile = game.world.tile_at(1, 1).unwrap();
        ready_building(&mut game, tile, BuildingKind::Barracks, 1);
        cursor_to(&mut game, 1, 1, 1);
        game.execute_command(1, Command::Upgrade).unwrap();
        assert_eq!(game.players[&1].mode, Mode::UpgradeMenu);
        game.execute_command(1, Command::Move(Direction::Right)).unwrap();
        assert_eq!(game.players[&1].mode, Mode::Normal);
        assert_eq!(game.building_kind(tile), Some(BuildingKind::ShieldsBarracks));
        assert_eq!(game.players[&1].gold, 10);
    }

    #[test]
    fn test_upgrade_refused_for_castle_and_unbuilt() {
        let mut game = game_with(MAP, Rules::default());
        assert_eq!(
            game.execute_command(1, Command::Upgrade),
            Err(Refusal::NotUpgradable(BuildingKind::Castle))
        );
        cursor_to(&mut game, 1, 1, 0);
        game.execute_command(1, Command::BuildTower).unwrap();
        assert_eq!(
            game.execute_command(1, Command::Upgrade),
            Err(Refusal::UnderConstruction)
        );
        assert_eq!(game.players[&1].mode, Mode::Normal);
    }

    #[test]
    fn test_path_mode_commands() {
        let mut game = game_with(MAP, Rules::default());
        let tile = game.world.tile_at(1, 1).unwrap();
        ready_building(&mut game, tile, BuildingKind::Barracks, 1);
        cursor_to(&mut game, 1, 1, 1);
        game.execute_command(1, Command::Action).unwrap();
        assert_eq!(game.players[&1].mode, Mode::PathBuilding);
        game.execute_command(1, Command::Move(Direction::Right)).unwrap();
        game.execute_command(1, Command::Move(Direction::Right)).unwrap();
        assert_eq!(
            game.execute_command(1, Command::BuildTower),
            Err(Refusal::WrongMode)
        );
        game.execute_command(1, Command::Action).unwrap();
        assert_eq!(game.players[&1].mode, Mode::Normal);
        assert_eq!(game.paths.values().next().unwrap().tiles.len(), 3);

        cursor_to(&mut game, 1, 1, 1);
        game.execute_command(1, Command::StartPath).unwrap();
        game.execute_command(1, Command::Move(Direction::Down)).unwrap();
        game.execute_command(1, Command::Upgrade).unwrap();
        assert_eq!(game.players[&1].mode, Mode::Normal);
        assert!(game.paths.is_empty());
    }

    #[test]
    fn test_lost_player_commands_discarded() {
        let mut game = game_with("1oo\nooo\noo2\n", Rules::default());
        game.players.get_mut(&2).unwrap().lose();
        let before = game.players[&2].clone();
        assert_eq!(
            game.execute_command(2, Command::Move(Direction::Up)),
            Err(Refusal::PlayerLost(2))
        );
        assert_eq!(game.players[&2], before);
        assert_eq!(
            game.execute_command(9, Command::Action),
            Err(Refusal::UnknownPlayer(9))
        );
    }
}
