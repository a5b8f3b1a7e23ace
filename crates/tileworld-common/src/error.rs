//! Error types for Tileworld.

use thiserror::Error;

/// Top-level error type for Tileworld operations.
#[derive(Debug, Error)]
pub enum TileworldError {
    /// World/chunk errors
    #[error("World error: {0}")]
    World(#[from] WorldError),

    /// World was written by an incompatible format version
    #[error("Format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version found
        actual: String,
    },
}

/// World and chunk errors.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Chunk is neither resident, stored, nor generatable
    #[error("Chunk not found at ({x}, {y})")]
    ChunkNotFound {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
    },

    /// Mutation targets a chunk that is not resident in memory
    #[error("Chunk ({x}, {y}) is not loaded")]
    ChunkNotLoaded {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
    },

    /// Reading world data failed
    #[error("Load failed: {0}")]
    LoadFailed(String),

    /// Writing world data failed
    #[error("Save failed: {0}")]
    SaveFailed(String),

    /// The world actor or store has shut down
    #[error("World is closed")]
    Closed,
}

/// Result type alias for Tileworld operations.
pub type TileworldResult<T> = Result<T, TileworldError>;

/// Result type alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
