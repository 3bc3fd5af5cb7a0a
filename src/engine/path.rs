// Paths: ordered tile sequences rooted at a barracks, drawn one step at a time.

use super::config::Family;
use super::game::Game;
use super::player::Mode;
use super::world::{Direction, PlayerId, TileId};
use super::Refusal;

pub type PathId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub id: PathId,
    pub owner: PlayerId,
    /// `tiles[0]` is the barracks tile.
    pub tiles: Vec<TileId>,
    /// Set once the owner finishes drawing; only released paths receive soldiers.
    pub released: bool,
}

impl Path {
    pub fn root(&self) -> TileId {
        self.tiles[0]
    }

    pub fn tip(&self) -> TileId {
        self.tiles[self.tiles.len() - 1]
    }
}

impl Game {
    /// Begin drawing a path from a built barracks the player owns. Any path
    /// already rooted there is destroyed. With crossing disabled, a barracks
    /// that another of the player's paths runs over cannot start one.
    pub fn start_path(&mut self, player: PlayerId, tile: TileId) -> Result<(), Refusal> {
        let t = self.world.tile(tile);
        match t.building() {
            Some(b)
                if b.owner == player && b.built && b.family() == Family::Barracks => {}
            _ => return Err(Refusal::NotBarracks),
        }
        if t.owner() != Some(player) {
            return Err(Refusal::NotOwner);
        }
        if !self.rules().paths_can_cross {
            let crossing = t
                .path_marker(player)
                .and_then(|id| self.paths.get(&id))
                .is_some_and(|p| p.root() != tile);
            if crossing {
                return Err(Refusal::PathCrossing);
            }
        }

        self.destroy_paths_rooted_at(tile, player);

        let id = self.next_path_id;
        self.next_path_id += 1;
        self.paths.insert(
            id,
            Path {
                id,
                owner: player,
                tiles: vec![tile],
                released: false,
            },
        );
        self.world.set_path_marker(tile, player, id);

        if let Some(p) = self.players.get_mut(&player) {
            p.builder.reset();
            p.builder.path = Some(id);
            p.cursor = tile;
            p.mode = Mode::PathBuilding;
        }
        tracing::debug!(player, tile, path = id, "started building a path");
        Ok(())
    }

    /// One directional step while drawing: retreat if it undoes the last
    /// extension, otherwise extend.
    pub fn step_path(&mut self, player: PlayerId, dir: Direction) -> Result<(), Refusal> {
        let path_id = self.active_path(player)?;
        let last_step = self
            .players
            .get(&player)
            .and_then(|p| p.builder.steps.last().copied());
        if last_step == Some(dir.opposite()) {
            self.retreat_path(player, path_id)
        } else {
            self.extend_path(player, path_id, dir)
        }
    }

    fn extend_path(&mut self, player: PlayerId, path_id: PathId, dir: Direction) -> Result<(), Refusal> {
        let tip = self.paths[&path_id].tip();
        let next = self.world.neighbour(tip, dir).ok_or(Refusal::OffGrid)?;
        let target = self.world.tile(next);
        if target.owner() == Some(player)
            && target
                .building()
                .is_some_and(|b| b.owner == player && b.family() != Family::Barracks)
        {
            return Err(Refusal::PathBlocked);
        }
        if !self.rules().paths_can_cross && target.path_marker(player).is_some() {
            return Err(Refusal::PathCrossing);
        }
        if let Some(path) = self.paths.get_mut(&path_id) {
            path.tiles.push(next);
        }
        self.world.set_path_marker(next, player, path_id);
        if let Some(p) = self.players.get_mut(&player) {
            p.builder.steps.push(dir);
            p.cursor = next;
        }
        Ok(())
    }

    fn retreat_path(&mut self, player: PlayerId, path_id: PathId) -> Result<(), Refusal> {
        let Some(path) = self.paths.get_mut(&path_id) else {
            return Err(Refusal::NoActivePath);
        };
        if path.tiles.len() < 2 {
            return Err(Refusal::NoActivePath);
        }
        let popped = path.tiles.pop().unwrap_or_default();
        let tip = path.tip();
        self.world.clear_path_marker(popped, player, path_id);
        if let Some(p) = self.players.get_mut(&player) {
            p.builder.steps.pop();
            p.cursor = tip;
        }
        Ok(())
    }

    /// Release the path to its barracks. A path that never left the barracks
    /// is cancelled instead.
    pub fn finish_path(&mut self, player: PlayerId) -> Result<(), Refusal> {
        let path_id = self.active_path(player)?;
        let (root, len) = {
            let path = &self.paths[&path_id];
            (path.root(), path.tiles.len())
        };
        if len == 1 {
            return self.cancel_path(player);
        }
        if let Some(path) = self.paths.get_mut(&path_id) {
            path.released = true;
        }
        if let Some(b) = self.world.tile_mut(root).building_mut() {
            b.attach_path(Some(path_id));
        }
        self.leave_path_mode(player);
        tracing::debug!(player, path = path_id, tiles = len, "path finished");
        Ok(())
    }

    pub fn cancel_path(&mut self, player: PlayerId) -> Result<(), Refusal> {
        let path_id = self.active_path(player)?;
        self.destroy_path(path_id);
        self.leave_path_mode(player);
        tracing::debug!(player, path = path_id, "path cancelled");
        Ok(())
    }

    /// The path the player is drawing. Drops the player back to normal mode if
    /// that path disappeared underneath them.
    fn active_path(&mut self, player: PlayerId) -> Result<PathId, Refusal> {
        let path = self
            .players
            .get(&player)
            .ok_or(Refusal::UnknownPlayer(player))?
            .builder
            .path;
        match path {
            Some(id) if self.paths.contains_key(&id) => Ok(id),
            _ => {
                self.leave_path_mode(player);
                Err(Refusal::NoActivePath)
            }
        }
    }

    fn leave_path_mode(&mut self, player: PlayerId) {
        if let Some(p) = self.players.get_mut(&player) {
            p.builder.reset();
            if p.mode == Mode::PathBuilding {
                p.mode = Mode::Normal;
            }
        }
    }

    /// Remove a path, clear its occupancy markers and detach it from its barracks.
    pub fn destroy_path(&mut self, id: PathId) {
        let Some(path) = self.paths.remove(&id) else {
            return;
        };
        for &tile in &path.tiles {
            self.world.clear_path_marker(tile, path.owner, id);
        }
        if let Some(b) = self.world.tile_mut(path.root()).building_mut() {
            if b.attached_path() == Some(id) {
                b.attach_path(None);
            }
        }
        let drawing = self
            .players
            .get(&path.owner)
            .is_some_and(|p| p.builder.path == Some(id));
        if drawing {
            self.leave_path_mode(path.owner);
        }
        tracing::debug!(path = id, owner = path.owner, "path destroyed");
    }

    /// Destroy every path of `owner` that starts on `tile`.
    pub fn destroy_paths_rooted_at(&mut self, tile: TileId, owner: PlayerId) {
        let doomed: Vec<PathId> = self
            .paths
            .values()
            .filter(|p| p.owner == owner && p.root() == tile)
            .map(|p| p.id)
            .collect();
        for id in doomed {
            self.destroy_path(id);
        }
    }
}
