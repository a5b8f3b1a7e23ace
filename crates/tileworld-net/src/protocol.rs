//! Message catalog.
//!
//! Every message is a plain serde struct. [`Message`] wraps them with an
//! explicit [`MessageKind`] id used as the frame discriminant on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tileworld_common::{unix_millis, ChunkCoord};
use tileworld_world::{ChunkState, Direction, PlayerState, TileId, WorldObject, WorldObjectUpdate};

/// Wire id of each message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// [`LoginRequest`]
    LoginRequest = 1,
    /// [`LoginResponse`]
    LoginResponse = 2,
    /// [`CreateUserRequest`]
    CreateUserRequest = 3,
    /// [`CreateUserResponse`]
    CreateUserResponse = 4,
    /// [`PlayerMoveRequest`]
    PlayerMoveRequest = 5,
    /// [`ChunkRequest`]
    ChunkRequest = 6,
    /// [`ChunkData`]
    ChunkData = 7,
    /// [`PlayerStatesUpdate`]
    PlayerStatesUpdate = 8,
    /// [`WorldObjectsUpdate`]
    WorldObjectsUpdate = 9,
    /// [`ChatMessage`]
    ChatMessage = 10,
    /// [`ObjectUpdateRequest`]
    ObjectUpdateRequest = 11,
}

impl MessageKind {
    /// Numeric wire id.
    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Looks up a kind by wire id.
    #[must_use]
    pub const fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            1 => Self::LoginRequest,
            2 => Self::LoginResponse,
            3 => Self::CreateUserRequest,
            4 => Self::CreateUserResponse,
            5 => Self::PlayerMoveRequest,
            6 => Self::ChunkRequest,
            7 => Self::ChunkData,
            8 => Self::PlayerStatesUpdate,
            9 => Self::WorldObjectsUpdate,
            10 => Self::ChatMessage,
            11 => Self::ObjectUpdateRequest,
            _ => return None,
        })
    }

    /// Whether an unauthenticated connection may send this kind.
    #[must_use]
    pub const fn allowed_before_login(self) -> bool {
        matches!(self, Self::LoginRequest | Self::CreateUserRequest)
    }
}

/// Client → server: authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Identity
    pub username: String,
    /// Secret, checked by the credential store
    pub password: String,
    /// Client unix millis
    pub timestamp: u64,
}

/// Server → client: login outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Whether the connection is now authenticated
    pub success: bool,
    /// Human-readable reason
    pub message: String,
    /// Identity the connection is bound to
    pub username: String,
    /// Spawn tile X
    pub start_x: i32,
    /// Spawn tile Y
    pub start_y: i32,
}

/// Client → server: register an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    /// Requested identity
    pub username: String,
    /// Secret
    pub password: String,
}

/// Server → client: registration outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserResponse {
    /// Whether the identity was created
    pub success: bool,
    /// Human-readable reason
    pub message: String,
}

/// Client → server: the local player moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMoveRequest {
    /// Tile X
    pub x: i32,
    /// Tile Y
    pub y: i32,
    /// Running
    pub running: bool,
    /// Walking
    pub moving: bool,
    /// Facing direction
    pub direction: Direction,
}

/// Client → server: send me a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Chunk X
    pub chunk_x: i32,
    /// Chunk Y
    pub chunk_y: i32,
    /// Client unix millis
    pub timestamp: u64,
}

/// Server → client: one chunk's full contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    /// Chunk X
    pub chunk_x: i32,
    /// Chunk Y
    pub chunk_y: i32,
    /// Row-major tile ids
    pub tiles: Vec<TileId>,
    /// Objects in the chunk
    pub objects: Vec<WorldObject>,
}

impl ChunkData {
    /// Chunk coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.chunk_x, self.chunk_y)
    }
}

impl From<&ChunkState> for ChunkData {
    fn from(chunk: &ChunkState) -> Self {
        Self {
            chunk_x: chunk.key.x,
            chunk_y: chunk.key.y,
            tiles: chunk.tiles.as_slice().to_vec(),
            objects: chunk.objects.clone(),
        }
    }
}

/// Per-player state as broadcast to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSyncData {
    /// Tile X
    pub x: i32,
    /// Tile Y
    pub y: i32,
    /// Facing direction
    pub direction: Direction,
    /// Walking
    pub moving: bool,
    /// Running
    pub running: bool,
}

impl From<&PlayerState> for PlayerSyncData {
    fn from(state: &PlayerState) -> Self {
        Self {
            x: state.tile_x,
            y: state.tile_y,
            direction: state.direction,
            moving: state.is_moving,
            running: state.wants_to_run,
        }
    }
}

/// Server → clients: every active player's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatesUpdate {
    /// Active players by identity
    pub players: BTreeMap<String, PlayerSyncData>,
}

/// Server → clients: object deltas since the last tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldObjectsUpdate {
    /// Deltas in application order
    pub objects: Vec<WorldObjectUpdate>,
}

/// Chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatKind {
    /// Sent by a player
    #[default]
    Player,
    /// Sent by the server
    System,
}

/// Chat line; relayed to every other authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author identity
    pub sender: String,
    /// Text
    pub content: String,
    /// Unix millis
    pub timestamp: u64,
    /// Channel
    pub kind: ChatKind,
}

/// Client → server: mutate one world object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUpdateRequest {
    /// Requested delta
    pub update: WorldObjectUpdate,
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`LoginRequest`]
    LoginRequest(LoginRequest),
    /// See [`LoginResponse`]
    LoginResponse(LoginResponse),
    /// See [`CreateUserRequest`]
    CreateUserRequest(CreateUserRequest),
    /// See [`CreateUserResponse`]
    CreateUserResponse(CreateUserResponse),
    /// See [`PlayerMoveRequest`]
    PlayerMoveRequest(PlayerMoveRequest),
    /// See [`ChunkRequest`]
    ChunkRequest(ChunkRequest),
    /// See [`ChunkData`]
    ChunkData(ChunkData),
    /// See [`PlayerStatesUpdate`]
    PlayerStatesUpdate(PlayerStatesUpdate),
    /// See [`WorldObjectsUpdate`]
    WorldObjectsUpdate(WorldObjectsUpdate),
    /// See [`ChatMessage`]
    ChatMessage(ChatMessage),
    /// See [`ObjectUpdateRequest`]
    ObjectUpdateRequest(ObjectUpdateRequest),
}

impl Message {
    /// Wire kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::LoginRequest(_) => MessageKind::LoginRequest,
            Self::LoginResponse(_) => MessageKind::LoginResponse,
            Self::CreateUserRequest(_) => MessageKind::CreateUserRequest,
            Self::CreateUserResponse(_) => MessageKind::CreateUserResponse,
            Self::PlayerMoveRequest(_) => MessageKind::PlayerMoveRequest,
            Self::ChunkRequest(_) => MessageKind::ChunkRequest,
            Self::ChunkData(_) => MessageKind::ChunkData,
            Self::PlayerStatesUpdate(_) => MessageKind::PlayerStatesUpdate,
            Self::WorldObjectsUpdate(_) => MessageKind::WorldObjectsUpdate,
            Self::ChatMessage(_) => MessageKind::ChatMessage,
            Self::ObjectUpdateRequest(_) => MessageKind::ObjectUpdateRequest,
        }
    }

    /// A login request stamped with the current time.
    #[must_use]
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::LoginRequest(LoginRequest {
            username: username.into(),
            password: password.into(),
            timestamp: unix_millis(),
        })
    }

    /// A chunk request stamped with the current time.
    #[must_use]
    pub fn chunk_request(coord: ChunkCoord) -> Self {
        Self::ChunkRequest(ChunkRequest {
            chunk_x: coord.x,
            chunk_y: coord.y,
            timestamp: unix_millis(),
        })
    }

    /// Failed login response.
    #[must_use]
    pub fn login_failed(username: &str, message: impl Into<String>) -> Self {
        Self::LoginResponse(LoginResponse {
            success: false,
            message: message.into(),
            username: username.to_string(),
            start_x: 0,
            start_y: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids_roundtrip() {
        for id in 1..=11 {
            let kind = MessageKind::from_id(id).expect("known id");
            assert_eq!(kind.id(), id);
        }
        assert!(MessageKind::from_id(0).is_none());
        assert!(MessageKind::from_id(12).is_none());
    }

    #[test]
    fn test_only_auth_messages_allowed_before_login() {
        assert!(MessageKind::LoginRequest.allowed_before_login());
        assert!(MessageKind::CreateUserRequest.allowed_before_login());
        assert!(!MessageKind::PlayerMoveRequest.allowed_before_login());
        assert!(!MessageKind::ChunkRequest.allowed_before_login());
        assert!(!MessageKind::ChatMessage.allowed_before_login());
        assert!(!MessageKind::ObjectUpdateRequest.allowed_before_login());
    }

    #[test]
    fn test_sync_data_from_state() {
        let mut state = PlayerState::new("erin");
        state.tile_x = 4;
        state.tile_y = -9;
        state.direction = Direction::Up;
        state.is_moving = true;
        let sync = PlayerSyncData::from(&state);
        assert_eq!((sync.x, sync.y), (4, -9));
        assert_eq!(sync.direction, Direction::Up);
        assert!(sync.moving && !sync.running);
    }
}
