use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::building::Building;
use super::map::{Cell, MapLayout};
use super::path::PathId;
use super::unit::UnitId;
use super::Refusal;

/// Index of a tile in the world arena. Stable for the lifetime of a game.
pub type TileId = usize;
pub type PlayerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::UpLeft,
        Direction::UpRight,
        Direction::DownLeft,
        Direction::DownRight,
    ];

    /// Grid offset `(dx, dy)`; y grows downwards.
    pub fn offset(self) -> (isize, isize) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::UpLeft => (-1, -1),
            Direction::UpRight => (1, -1),
            Direction::DownLeft => (-1, 1),
            Direction::DownRight => (1, 1),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::UpLeft => Direction::DownRight,
            Direction::UpRight => Direction::DownLeft,
            Direction::DownLeft => Direction::UpRight,
            Direction::DownRight => Direction::UpLeft,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::UpLeft => "up-left",
            Direction::UpRight => "up-right",
            Direction::DownLeft => "down-left",
            Direction::DownRight => "down-right",
        }
    }

    pub fn from_label(label: &str) -> Option<Direction> {
        Direction::ALL.into_iter().find(|d| d.label() == label)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A single grid cell. Knows its neighbours by index, never by reference.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: TileId,
    pub x: usize,
    pub y: usize,
    neighbours: [Option<TileId>; 8],
    owner: Option<PlayerId>,
    building: Option<Building>,
    /// Number of buildings per player on this tile or next to it.
    ownership: BTreeMap<PlayerId, u32>,
    /// Most recent path of each player crossing this tile.
    paths: BTreeMap<PlayerId, PathId>,
    /// Soldiers currently heading for this tile.
    units: Vec<UnitId>,
}

impl Tile {
    fn new(id: TileId, x: usize, y: usize) -> Self {
        Tile {
            id,
            x,
            y,
            neighbours: [None; 8],
            owner: None,
            building: None,
            ownership: BTreeMap::new(),
            paths: BTreeMap::new(),
            units: Vec::new(),
        }
    }

    pub fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    pub fn building(&self) -> Option<&Building> {
        self.building.as_ref()
    }

    pub(crate) fn building_mut(&mut self) -> Option<&mut Building> {
        self.building.as_mut()
    }

    pub fn ownership(&self, player: PlayerId) -> u32 {
        self.ownership.get(&player).copied().unwrap_or(0)
    }

    pub fn ownership_counters(&self) -> &BTreeMap<PlayerId, u32> {
        &self.ownership
    }

    pub fn path_marker(&self, player: PlayerId) -> Option<PathId> {
        self.paths.get(&player).copied()
    }

    pub fn units(&self) -> &[UnitId] {
        &self.units
    }
}

/// The tile graph: an arena of tiles plus a grid lookup for holes.
#[derive(Debug, Clone)]
pub struct World {
    pub width: usize,
    pub height: usize,
    tiles: Vec<Tile>,
    grid: Vec<Option<TileId>>,
    starts: Vec<(PlayerId, TileId)>,
}

impl World {
    /// Build the tile graph for a parsed map. Starting tiles are owned by their
    /// player but carry no building yet.
    pub fn from_layout(layout: &MapLayout) -> Self {
        let mut tiles = Vec::new();
        let mut grid = vec![None; layout.width * layout.height];
        let mut starts = Vec::new();
        for y in 0..layout.height {
            for x in 0..layout.width {
                let cell = layout.cell(x, y);
                if cell == Cell::Empty {
                    continue;
                }
                let id = tiles.len();
                let mut tile = Tile::new(id, x, y);
                if let Cell::Start(player) = cell {
                    tile.owner = Some(player);
                    starts.push((player, id));
                }
                tiles.push(tile);
                grid[y * layout.width + x] = Some(id);
            }
        }
        starts.sort_unstable();

        let mut world = World {
            width: layout.width,
            height: layout.height,
            tiles,
            grid,
            starts,
        };
        for id in 0..world.tiles.len() {
            let (x, y) = (world.tiles[id].x, world.tiles[id].y);
            for dir in Direction::ALL {
                let (dx, dy) = dir.offset();
                let n = world.tile_at_offset(x, y, dx, dy);
                world.tiles[id].neighbours[dir.slot()] = n;
            }
        }
        world
    }

    fn tile_at_offset(&self, x: usize, y: usize, dx: isize, dy: isize) -> Option<TileId> {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        self.tile_at(nx, ny)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, id: TileId) -> &Tile {
        &self.tiles[id]
    }

    pub(crate) fn tile_mut(&mut self, id: TileId) -> &mut Tile {
        &mut self.tiles[id]
    }

    pub fn tile_at(&self, x: usize, y: usize) -> Option<TileId> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.grid[y * self.width + x]
    }

    /// Starting tile of every player, ordered by player id.
    pub fn starts(&self) -> &[(PlayerId, TileId)] {
        &self.starts
    }

    pub fn neighbour(&self, id: TileId, dir: Direction) -> Option<TileId> {
        self.tiles[id].neighbours[dir.slot()]
    }

    pub fn neighbours(&self, id: TileId) -> impl Iterator<Item = TileId> + '_ {
        self.tiles[id].neighbours.iter().flatten().copied()
    }

    /// Tile centre in tile units.
    pub fn center(&self, id: TileId) -> (f32, f32) {
        let t = &self.tiles[id];
        (t.x as f32 + 0.5, t.y as f32 + 0.5)
    }

    /// Whether `player` may construct on `id`.
    pub fn can_build(&self, id: TileId, player: PlayerId) -> Result<(), Refusal> {
        let tile = &self.tiles[id];
        if tile.building.is_some() {
            return Err(Refusal::Occupied);
        }
        if tile.owner != Some(player) {
            return Err(Refusal::NotOwner);
        }
        Ok(())
    }

    /// Put a building on a free tile and extend its owner's control over the
    /// tile and every neighbour.
    pub fn place_building(&mut self, id: TileId, building: Building) -> Result<(), Refusal> {
        self.can_build(id, building.owner)?;
        let owner = building.owner;
        self.tiles[id].building = Some(building);
        self.claim(id, owner);
        let neighbours: Vec<TileId> = self.neighbours(id).collect();
        for n in neighbours {
            self.claim(n, owner);
        }
        Ok(())
    }

    /// Remove the building from a tile and withdraw its owner's control.
    pub fn remove_building(&mut self, id: TileId) -> Option<Building> {
        let building = self.tiles[id].building.take()?;
        let neighbours: Vec<TileId> = self.neighbours(id).collect();
        for n in neighbours {
            self.release(n, building.owner);
        }
        self.release(id, building.owner);
        Some(building)
    }

    /// Swap the building on an occupied tile without touching ownership.
    pub(crate) fn replace_building(&mut self, id: TileId, building: Building) -> Option<Building> {
        self.tiles[id].building.replace(building)
    }

    fn claim(&mut self, id: TileId, player: PlayerId) {
        *self.tiles[id].ownership.entry(player).or_insert(0) += 1;
        self.recompute_owner(id);
    }

    fn release(&mut self, id: TileId, player: PlayerId) {
        let tile = &mut self.tiles[id];
        match tile.ownership.get_mut(&player) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                tile.ownership.remove(&player);
            }
            None => {
                tracing::error!(tile = id, player, "ownership counter underflow");
                debug_assert!(false, "ownership counter underflow on tile {id}");
            }
        }
        self.recompute_owner(id);
    }

    /// A tile with a building belongs to the building's owner; otherwise to the
    /// player with the highest counter, lowest player id on ties.
    fn recompute_owner(&mut self, id: TileId) {
        let tile = &mut self.tiles[id];
        tile.owner = match &tile.building {
            Some(b) => Some(b.owner),
            None => {
                let mut best: Option<(PlayerId, u32)> = None;
                for (&player, &count) in &tile.ownership {
                    if best.map_or(true, |(_, c)| count > c) {
                        best = Some((player, count));
                    }
                }
                best.map(|(player, _)| player)
            }
        };
    }

    /// Recount every ownership counter from the buildings on the board.
    pub(crate) fn rebuild_ownership(&mut self) {
        for tile in &mut self.tiles {
            tile.ownership.clear();
        }
        let owners: Vec<(TileId, PlayerId)> = self
            .tiles
            .iter()
            .filter_map(|t| t.building.as_ref().map(|b| (t.id, b.owner)))
            .collect();
        for (id, owner) in owners {
            *self.tiles[id].ownership.entry(owner).or_insert(0) += 1;
            let neighbours: Vec<TileId> = self.neighbours(id).collect();
            for n in neighbours {
                *self.tiles[n].ownership.entry(owner).or_insert(0) += 1;
            }
        }
    }

    pub(crate) fn set_owner(&mut self, id: TileId, owner: Option<PlayerId>) {
        self.tiles[id].owner = owner;
    }

    pub(crate) fn take_building_raw(&mut self, id: TileId) -> Option<Building> {
        self.tiles[id].building.take()
    }

    pub(crate) fn set_path_marker(&mut self, id: TileId, player: PlayerId, path: PathId) {
        self.tiles[id].paths.insert(player, path);
    }

    /// Clear a player's marker, but only if it still points at `path`.
    pub(crate) fn clear_path_marker(&mut self, id: TileId, player: PlayerId, path: PathId) {
        let markers = &mut self.tiles[id].paths;
        if markers.get(&player) == Some(&path) {
            markers.remove(&player);
        }
    }

    pub(crate) fn clear_all_path_markers(&mut self) {
        for tile in &mut self.tiles {
            tile.paths.clear();
        }
    }

    pub(crate) fn add_unit(&mut self, id: TileId, unit: UnitId) {
        self.tiles[id].units.push(unit);
    }

    pub(crate) fn remove_unit(&mut self, id: TileId, unit: UnitId) {
        self.tiles[id].units.retain(|u| *u != unit);
    }

    pub(crate) fn clear_all_units(&mut self) {
        for tile in &mut self.tiles {
            tile.units.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{BuildingKind, Rules};

    fn world(text: &str) -> World {
        World::from_layout(&MapLayout::parse(text, 2).unwrap())
    }

    fn building(kind: BuildingKind, owner: PlayerId) -> Building {
        Building::new(kind, owner, &Rules::default())
    }

    fn world_with_castles(text: &str) -> World {
        let mut w = world(text);
        for (player, tile) in w.starts().to_vec() {
            w.place_building(tile, building(BuildingKind::Castle, player))
                .unwrap();
        }
        w
    }

    /// Owner is None iff every counter is zero; otherwise the counter-maximal player.
    fn assert_ownership_consistent(w: &World) {
        for tile in w.tiles() {
            if let Some(b) = tile.building() {
                assert_eq!(tile.owner(), Some(b.owner));
                continue;
            }
            let max = tile.ownership_counters().values().max().copied().unwrap_or(0);
            if max == 0 {
                assert_eq!(tile.owner(), None, "tile {}", tile.id);
            } else {
                let expected = tile
                    .ownership_counters()
                    .iter()
                    .find(|(_, c)| **c == max)
                    .map(|(p, _)| *p);
                assert_eq!(tile.owner(), expected, "tile {}", tile.id);
            }
        }
    }

    #[test]
    fn test_neighbours_skip_holes_and_edges() {
        let w = world("1o.\noo2\n");
        let corner = w.tile_at(0, 0).unwrap();
        assert_eq!(w.neighbour(corner, Direction::Up), None);
        assert_eq!(w.neighbour(corner, Direction::Right), w.tile_at(1, 0));
        assert_eq!(w.neighbours(corner).count(), 3);
        let middle = w.tile_at(1, 0).unwrap();
        // (2, 0) is a hole
        assert_eq!(w.neighbour(middle, Direction::Right), None);
        assert_eq!(w.len(), 5);
    }

    #[test]
    fn test_place_building_claims_neighbours() {
        let w = world_with_castles("1oo\nooo\noo2\n");
        let start = w.tile_at(0, 0).unwrap();
        let right = w.tile_at(1, 0).unwrap();
        let diag = w.tile_at(1, 1).unwrap();
        let far = w.tile_at(2, 0).unwrap();
        assert_eq!(w.tile(right).owner(), Some(1));
        assert_eq!(w.tile(diag).owner(), Some(1));
        assert_eq!(w.tile(far).owner(), None);
        assert_eq!(w.tile(start).ownership(1), 1);
        assert_ownership_consistent(&w);
    }

    #[test]
    fn test_build_refused_on_foreign_or_occupied_tile() {
        let mut w = world_with_castles("1oo\nooo\noo2\n");
        let start = w.tile_at(0, 0).unwrap();
        let neutral = w.tile_at(2, 0).unwrap();
        let theirs = w.tile_at(2, 1).unwrap();
        assert_eq!(
            w.place_building(neutral, building(BuildingKind::Tower, 1)),
            Err(Refusal::NotOwner)
        );
        assert_eq!(
            w.place_building(theirs, building(BuildingKind::Tower, 1)),
            Err(Refusal::NotOwner)
        );
        assert_eq!(
            w.place_building(start, building(BuildingKind::Tower, 1)),
            Err(Refusal::Occupied)
        );
        assert_ownership_consistent(&w);
    }

    #[test]
    fn test_tie_goes_to_lowest_player_id() {
        // 1 and 2 both border the middle column.
        let mut w = world("1o2\n");
        let p1 = w.tile_at(0, 0).unwrap();
        let p2 = w.tile_at(2, 0).unwrap();
        let middle = w.tile_at(1, 0).unwrap();
        w.place_building(p2, building(BuildingKind::Castle, 2)).unwrap();
        assert_eq!(w.tile(middle).owner(), Some(2));
        w.place_building(p1, building(BuildingKind::Castle, 1)).unwrap();
        assert_eq!(w.tile(middle).ownership(1), 1);
        assert_eq!(w.tile(middle).ownership(2), 1);
        assert_eq!(w.tile(middle).owner(), Some(1));
        assert_ownership_consistent(&w);
    }

    #[test]
    fn test_remove_building_restores_counters() {
        let mut w = world_with_castles("1oo\nooo\noo2\n");
        let mid = w.tile_at(1, 1).unwrap();
        let edge = w.tile_at(2, 0).unwrap();
        w.place_building(mid, building(BuildingKind::Tower, 1)).unwrap();
        assert_eq!(w.tile(edge).owner(), Some(1));
        let removed = w.remove_building(mid).unwrap();
        assert_eq!(removed.kind, BuildingKind::Tower);
        // Still bordered by both castles; the tie goes to player 1.
        assert_eq!(w.tile(mid).owner(), Some(1));
        assert_eq!(w.tile(edge).owner(), None);
        assert!(w.remove_building(mid).is_none());
        assert_ownership_consistent(&w);
    }

    #[test]
    fn test_rebuild_ownership_matches_incremental() {
        let mut w = world_with_castles("1oo\nooo\noo2\n");
        let before: Vec<_> = w.tiles().iter().map(|t| t.ownership_counters().clone()).collect();
        w.rebuild_ownership();
        let after: Vec<_> = w.tiles().iter().map(|t| t.ownership_counters().clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_path_marker_cleared_only_by_owner_path() {
        let mut w = world("1o2\n");
        w.set_path_marker(1, 1, 7);
        w.clear_path_marker(1, 1, 3);
        assert_eq!(w.tile(1).path_marker(1), Some(7));
        w.clear_path_marker(1, 1, 7);
        assert_eq!(w.tile(1).path_marker(1), None);
    }

    #[test]
    fn test_direction_labels_round_trip() {
        for dir in Direction::ALL {
            assert_eq!(Direction::from_label(dir.label()), Some(dir));
            assert_eq!(dir.opposite().opposite(), dir);
        }
    }
}
