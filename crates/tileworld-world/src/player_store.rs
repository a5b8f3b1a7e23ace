//! Player state keyed by identity.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tileworld_common::{ChunkCoord, TileCoord};
use tracing::{info, warn};

use crate::persistence::WorldPersistence;

/// Facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Facing up (negative Y).
    Up,
    /// Facing down.
    #[default]
    Down,
    /// Facing left.
    Left,
    /// Facing right.
    Right,
}

/// Persisted state of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Identity (username).
    pub username: String,
    /// Tile X.
    pub tile_x: i32,
    /// Tile Y.
    pub tile_y: i32,
    /// Facing direction.
    pub direction: Direction,
    /// Whether the player is walking.
    pub is_moving: bool,
    /// Whether the player holds run.
    pub wants_to_run: bool,
}

impl PlayerState {
    /// A new player standing at the world origin.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            tile_x: 0,
            tile_y: 0,
            direction: Direction::default(),
            is_moving: false,
            wants_to_run: false,
        }
    }

    /// Current tile.
    #[must_use]
    pub const fn tile(&self) -> TileCoord {
        TileCoord::new(self.tile_x, self.tile_y)
    }

    /// Chunk the player stands in.
    #[must_use]
    pub const fn chunk(&self) -> ChunkCoord {
        ChunkCoord::from_tile(self.tile_x, self.tile_y)
    }
}

/// A movement report from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerMove {
    /// New tile X.
    pub tile_x: i32,
    /// New tile Y.
    pub tile_y: i32,
    /// Facing direction.
    pub direction: Direction,
    /// Walking.
    pub moving: bool,
    /// Running.
    pub running: bool,
}

/// Identity → player state. Owned by a single writer.
#[derive(Debug, Default)]
pub struct PlayerStore {
    players: HashMap<String, PlayerState>,
    persistence: Option<Arc<WorldPersistence>>,
}

impl PlayerStore {
    /// Creates a store, optionally backed by durable storage.
    #[must_use]
    pub fn new(persistence: Option<Arc<WorldPersistence>>) -> Self {
        Self {
            players: HashMap::new(),
            persistence,
        }
    }

    /// Looks up a resident player.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<&PlayerState> {
        self.players.get(username)
    }

    /// Returns the player, loading it from storage or creating it at the origin.
    pub fn get_or_create(&mut self, username: &str) -> &PlayerState {
        if !self.players.contains_key(username) {
            let state = self.load(username).unwrap_or_else(|| {
                info!("Creating player {} at origin", username);
                PlayerState::new(username)
            });
            self.players.insert(username.to_string(), state);
        }
        &self.players[username]
    }

    fn load(&self, username: &str) -> Option<PlayerState> {
        let persistence = self.persistence.as_ref()?;
        match persistence.load_player(username) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to load player {}: {}", username, e);
                None
            },
        }
    }

    /// Applies a move to a resident player. Returns the new state.
    pub fn apply_move(&mut self, username: &str, mv: PlayerMove) -> Option<&PlayerState> {
        let state = self.players.get_mut(username)?;
        state.tile_x = mv.tile_x;
        state.tile_y = mv.tile_y;
        state.direction = mv.direction;
        state.is_moving = mv.moving;
        state.wants_to_run = mv.running;
        Some(state)
    }

    /// Inserts or replaces a player.
    pub fn upsert(&mut self, state: PlayerState) {
        self.players.insert(state.username.clone(), state);
    }

    /// Persists one player. Failures are logged.
    pub fn save_player(&self, username: &str) -> bool {
        let (Some(persistence), Some(state)) = (&self.persistence, self.players.get(username))
        else {
            return false;
        };
        match persistence.save_player(state) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save player {}: {}", username, e);
                false
            },
        }
    }

    /// Persists every resident player. Returns how many were written.
    pub fn save_all(&self) -> usize {
        self.players
            .keys()
            .filter(|name| self.save_player(name))
            .count()
    }

    /// Iterates resident players.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    /// Number of resident players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no player is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
