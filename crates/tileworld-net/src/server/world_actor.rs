//! Single-writer owner of the server's world.
//!
//! The [`World`] lives on one blocking thread. Connection handlers talk to it
//! through a cloneable [`WorldHandle`], sending a command and awaiting the
//! reply, so store mutations are serialized without locks.

use std::collections::BTreeMap;

use tileworld_common::{ChunkCoord, TileworldResult, WorldError, WorldResult};
use tileworld_world::{ChunkState, PlayerMove, PlayerState, UpdateOutcome, World, WorldObjectUpdate};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::protocol::PlayerSyncData;

/// A request to the world thread.
#[derive(Debug)]
pub enum WorldCommand {
    /// Load or create a player
    Login {
        /// Identity
        username: String,
        /// Player state after login
        reply: oneshot::Sender<PlayerState>,
    },
    /// Apply a movement report
    Move {
        /// Identity
        username: String,
        /// Reported movement
        mv: PlayerMove,
        /// New state, `None` if the player is not resident
        reply: oneshot::Sender<Option<PlayerState>>,
    },
    /// Fetch (load or generate) a chunk
    GetChunk {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Chunk contents
        reply: oneshot::Sender<WorldResult<ChunkState>>,
    },
    /// Apply an object delta
    ApplyObjectUpdate {
        /// Delta
        update: WorldObjectUpdate,
        /// What changed
        reply: oneshot::Sender<WorldResult<UpdateOutcome>>,
    },
    /// Snapshot of the given players
    PlayerStates {
        /// Identities to include
        usernames: Vec<String>,
        /// States by identity
        reply: oneshot::Sender<BTreeMap<String, PlayerSyncData>>,
    },
    /// Persist one player
    SavePlayer {
        /// Identity
        username: String,
        /// Whether it was written
        reply: oneshot::Sender<bool>,
    },
    /// Persist the whole world
    Save {
        /// Outcome
        reply: oneshot::Sender<TileworldResult<()>>,
    },
}

/// Cloneable handle to the world thread.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    commands: mpsc::UnboundedSender<WorldCommand>,
}

impl WorldHandle {
    /// Moves the world onto a blocking thread. The join handle yields the world
    /// back once every handle is dropped.
    #[must_use]
    pub fn spawn(world: World) -> (Self, JoinHandle<World>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = tokio::task::spawn_blocking(move || run(world, rx));
        (Self { commands: tx }, thread)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WorldCommand,
    ) -> WorldResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| WorldError::Closed)?;
        rx.await.map_err(|_| WorldError::Closed)
    }

    /// Loads or creates a player.
    pub async fn login(&self, username: &str) -> WorldResult<PlayerState> {
        let username = username.to_string();
        self.request(|reply| WorldCommand::Login { username, reply })
            .await
    }

    /// Applies a movement report.
    pub async fn apply_move(
        &self,
        username: &str,
        mv: PlayerMove,
    ) -> WorldResult<Option<PlayerState>> {
        let username = username.to_string();
        self.request(|reply| WorldCommand::Move {
            username,
            mv,
            reply,
        })
        .await
    }

    /// Fetches a chunk.
    pub async fn get_chunk(&self, coord: ChunkCoord) -> WorldResult<ChunkState> {
        self.request(|reply| WorldCommand::GetChunk { coord, reply })
            .await?
    }

    /// Applies an object delta.
    pub async fn apply_object_update(
        &self,
        update: WorldObjectUpdate,
    ) -> WorldResult<UpdateOutcome> {
        self.request(|reply| WorldCommand::ApplyObjectUpdate { update, reply })
            .await?
    }

    /// Snapshot of the given players.
    pub async fn player_states(
        &self,
        usernames: Vec<String>,
    ) -> WorldResult<BTreeMap<String, PlayerSyncData>> {
        self.request(|reply| WorldCommand::PlayerStates { usernames, reply })
            .await
    }

    /// Persists one player.
    pub async fn save_player(&self, username: &str) -> WorldResult<bool> {
        let username = username.to_string();
        self.request(|reply| WorldCommand::SavePlayer { username, reply })
            .await
    }

    /// Persists the whole world.
    pub async fn save(&self) -> TileworldResult<()> {
        self.request(|reply| WorldCommand::Save { reply }).await?
    }
}

fn run(mut world: World, mut commands: mpsc::UnboundedReceiver<WorldCommand>) -> World {
    info!("World thread started for '{}'", world.meta().name);

    while let Some(command) = commands.blocking_recv() {
        match command {
            WorldCommand::Login { username, reply } => {
                let state = world.players_mut().get_or_create(&username).clone();
                let _ = reply.send(state);
            },
            WorldCommand::Move {
                username,
                mv,
                reply,
            } => {
                let state = world.players_mut().apply_move(&username, mv).cloned();
                let _ = reply.send(state);
            },
            WorldCommand::GetChunk { coord, reply } => {
                let _ = reply.send(world.chunks().get_chunk(coord));
            },
            WorldCommand::ApplyObjectUpdate { update, reply } => {
                let _ = reply.send(world.chunks().apply_update(&update));
            },
            WorldCommand::PlayerStates { usernames, reply } => {
                let states = usernames
                    .into_iter()
                    .filter_map(|name| {
                        let sync = world.players().get(&name).map(PlayerSyncData::from)?;
                        Some((name, sync))
                    })
                    .collect();
                let _ = reply.send(states);
            },
            WorldCommand::SavePlayer { username, reply } => {
                let _ = reply.send(world.players().save_player(&username));
            },
            WorldCommand::Save { reply } => {
                let _ = reply.send(world.save());
            },
        }
    }

    debug!("World thread stopped");
    world
}
