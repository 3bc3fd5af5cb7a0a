// Application configuration, loaded from environment variables and CLI flags.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::engine::config::{Rules, RulesError};
use crate::engine::map::{MapError, MapLayout};

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port for game connections (line protocol).
    pub port: u16,
    /// Port for the HTTP side channel (health, metrics, spectators).
    pub http_port: u16,
    /// Name of a built-in map.
    pub map: String,
    /// Map text file; overrides `map` when set.
    pub map_file: Option<PathBuf>,
    /// Number of players in the game.
    pub players: u32,
    /// JSON file with rule overrides.
    pub rules_file: Option<PathBuf>,
    /// When set, run as a client against this server address instead of serving.
    pub join: Option<String>,
    /// Display name announced when joining.
    pub name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 5555,
            http_port: 3000,
            map: "The Rumble".to_string(),
            map_file: None,
            players: 2,
            rules_file: None,
            join: None,
            name: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("failed to read map file {path}: {source}")]
    MapFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `TILEWAR_PORT` - game port (default: 5555)
    /// - `TILEWAR_HTTP_PORT` - HTTP port (default: 3000)
    /// - `TILEWAR_MAP` - built-in map name (default: `The Rumble`)
    /// - `TILEWAR_MAP_FILE` - path to a map text file
    /// - `TILEWAR_PLAYERS` - number of players (default: 2)
    /// - `TILEWAR_RULES` - path to a JSON rules file
    ///
    /// CLI flags take precedence over the environment:
    /// `--port`, `--http-port`, `--map`, `--map-file`, `--players`, `--rules`,
    /// `--join <ADDR>`, `--name <NAME>`.
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Resolve every setting from `args`, then `env`, then the default.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let value = |flag: &str, key: &str| Self::parse_cli_value(args, flag).or_else(|| env(key));

        let port = value("--port", "TILEWAR_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let http_port = value("--http-port", "TILEWAR_HTTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.http_port);
        let map = value("--map", "TILEWAR_MAP").unwrap_or(defaults.map);
        let map_file = value("--map-file", "TILEWAR_MAP_FILE").map(PathBuf::from);
        let players = value("--players", "TILEWAR_PLAYERS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.players);
        let rules_file = value("--rules", "TILEWAR_RULES").map(PathBuf::from);
        let join = Self::parse_cli_value(args, "--join");
        let name = Self::parse_cli_value(args, "--name");

        Config {
            port,
            http_port,
            map,
            map_file,
            players,
            rules_file,
            join,
            name,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }

    /// The game rules: defaults, or the rules file when one is configured.
    pub fn load_rules(&self) -> Result<Rules, ConfigError> {
        match &self.rules_file {
            Some(path) => Ok(Rules::load(path)?),
            None => Ok(Rules::default()),
        }
    }

    /// The map layout for the configured player count.
    pub fn load_layout(&self) -> Result<MapLayout, ConfigError> {
        match &self.map_file {
            Some(path) => Ok(MapLayout::parse(&read_map(path)?, self.players)?),
            None => Ok(MapLayout::builtin(&self.map, self.players)?),
        }
    }

    /// Human-readable name of the configured map.
    pub fn map_name(&self) -> String {
        match &self.map_file {
            Some(path) => path.display().to_string(),
            None => self.map.clone(),
        }
    }
}

fn read_map(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::MapFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(&args(&["tilewar-server"]), |_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 5555);
        assert!(config.join.is_none());
    }

    #[test]
    fn test_flag_beats_env_beats_default() {
        let env = |key: &str| match key {
            "TILEWAR_PORT" => Some("7000".to_string()),
            "TILEWAR_PLAYERS" => Some("4".to_string()),
            _ => None,
        };
        let config = Config::from_sources(&args(&["bin", "--port", "6000", "--map", "Canions"]), env);
        assert_eq!(config.port, 6000);
        assert_eq!(config.players, 4);
        assert_eq!(config.map, "Canions");
        assert_eq!(config.http_port, 3000);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = Config::from_sources(&args(&["bin", "--players", "many"]), |_| None);
        assert_eq!(config.players, 2);
    }

    #[test]
    fn test_join_mode() {
        let config = Config::from_sources(
            &args(&["bin", "--join", "10.0.0.1:5555", "--name", "ann"]),
            |_| None,
        );
        assert_eq!(config.join.as_deref(), Some("10.0.0.1:5555"));
        assert_eq!(config.name.as_deref(), Some("ann"));
    }

    #[test]
    fn test_load_layout() {
        let config = Config::default();
        let layout = config.load_layout().unwrap();
        assert_eq!(layout.width, 10);

        let unknown = Config {
            map: "Atlantis".into(),
            ..Config::default()
        };
        assert!(matches!(unknown.load_layout(), Err(ConfigError::Map(_))));

        let missing = Config {
            map_file: Some(PathBuf::from("/nonexistent/map.txt")),
            ..Config::default()
        };
        assert!(matches!(
            missing.load_layout(),
            Err(ConfigError::MapFile { .. })
        ));
    }
}
