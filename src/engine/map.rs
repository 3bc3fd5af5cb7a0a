// Map text parsing and the built-in map list.
//
// A map is a multi-line grid: `.` is a hole, `1`..`4` a starting cell for that
// player, anything else a neutral buildable cell.

use serde::Serialize;
use thiserror::Error;

use super::world::PlayerId;

pub const MAX_PLAYERS: u32 = 4;

/// Built-in maps, by display name.
pub const BUILTIN_MAPS: &[(&str, &str)] = &[
    (
        "The Rumble",
        "oo..1o..oo\n\
         4ooooooooo\n\
         oooooooooo\n\
         ooooooo...\n\
         ooooooo3oo\n\
         o2..oo..oo\n",
    ),
    (
        "Canions",
        "1oooo.oooo2\n\
         ooooo.ooooo\n\
         ...ooooo...\n\
         ooooooooooo\n\
         3oooo.oooo4\n",
    ),
    (
        "Big Rumble",
        "oo..ooo.ooo\n\
         4ooo..oooo1\n\
         ooooooooooo\n\
         o..ooooo...\n\
         2ooo.oooooo\n\
         oo..oooo.o3\n",
    ),
    (
        "The Donut",
        ".ooooooooo.\n\
         o1o..o..o3o\n\
         oo...o...oo\n\
         oo...o...oo\n\
         o4o..o..o2o\n\
         .ooooooooo.\n",
    ),
    (
        "Final Duel",
        "....ooo....\n\
         ooooooooooo\n\
         1ooo...ooo2\n\
         ooooooooooo\n\
         ....ooo....\n",
    ),
];

/// Look up a built-in map by name (case-insensitive).
pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN_MAPS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, layout)| *layout)
}

/// Metadata about a built-in map.
#[derive(Debug, Clone, Serialize)]
pub struct MapInfo {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub max_players: u32,
}

/// List the built-in maps that parse for their own player count.
pub fn list_maps() -> Vec<MapInfo> {
    BUILTIN_MAPS
        .iter()
        .filter_map(|(name, text)| {
            let max_players = count_markers(text);
            let layout = MapLayout::parse(text, max_players).ok()?;
            Some(MapInfo {
                name: name.to_string(),
                width: layout.width,
                height: layout.height,
                max_players,
            })
        })
        .collect()
}

fn count_markers(text: &str) -> u32 {
    (1..=MAX_PLAYERS)
        .take_while(|p| text.contains(char::from_digit(*p, 10).unwrap_or('0')))
        .count() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Neutral,
    Start(PlayerId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("map is empty")]
    Empty,
    #[error("player count must be between 2 and {MAX_PLAYERS}, got {0}")]
    PlayerCount(u32),
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("player {0} has more than one starting cell")]
    DuplicateStart(PlayerId),
    #[error("player {0} has no starting cell")]
    MissingStart(PlayerId),
    #[error("unknown map '{0}'")]
    UnknownMap(String),
}

/// Parsed map geometry: a rectangular grid of cells, row-major.
#[derive(Debug, Clone)]
pub struct MapLayout {
    pub width: usize,
    pub height: usize,
    cells: Vec<Cell>,
    pub players: u32,
}

impl MapLayout {
    /// Parse a map for `players` players. Markers above the player count are neutral cells.
    pub fn parse(text: &str, players: u32) -> Result<Self, MapError> {
        if !(2..=MAX_PLAYERS).contains(&players) {
            return Err(MapError::PlayerCount(players));
        }
        let rows: Vec<&str> = text
            .lines()
            .map(|r| r.trim_end_matches('\r'))
            .collect::<Vec<_>>();
        // Trailing blank lines are tolerated; blank lines in between are ragged rows.
        let used = rows.iter().rposition(|r| !r.is_empty()).map_or(0, |i| i + 1);
        let rows = &rows[..used];
        let width = rows.first().map_or(0, |r| r.chars().count());
        if width == 0 {
            return Err(MapError::Empty);
        }

        let mut cells = Vec::with_capacity(width * rows.len());
        let mut seen = [false; MAX_PLAYERS as usize];
        for (y, row) in rows.iter().enumerate() {
            let found = row.chars().count();
            if found != width {
                return Err(MapError::RaggedRow {
                    row: y,
                    expected: width,
                    found,
                });
            }
            for ch in row.chars() {
                let cell = match ch {
                    '.' => Cell::Empty,
                    c => match c.to_digit(10) {
                        Some(p) if (1..=players).contains(&p) => {
                            let slot = &mut seen[(p - 1) as usize];
                            if *slot {
                                return Err(MapError::DuplicateStart(p));
                            }
                            *slot = true;
                            Cell::Start(p)
                        }
                        _ => Cell::Neutral,
                    },
                };
                cells.push(cell);
            }
        }
        if let Some(missing) = (1..=players).find(|p| !seen[(*p - 1) as usize]) {
            return Err(MapError::MissingStart(missing));
        }

        Ok(MapLayout {
            width,
            height: rows.len(),
            cells,
            players,
        })
    }

    /// Parse a built-in map by name.
    pub fn builtin(name: &str, players: u32) -> Result<Self, MapError> {
        let text = builtin(name).ok_or_else(|| MapError::UnknownMap(name.to_string()))?;
        Self::parse(text, players)
    }

    pub fn cell(&self, x: usize, y: usize) -> Cell {
        self.cells[y * self.width + x]
    }
}
