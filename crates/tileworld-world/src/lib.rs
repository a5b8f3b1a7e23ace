//! # Tileworld World
//!
//! World management for Tileworld.
//!
//! This crate handles:
//! - Seeded noise fields and biome classification
//! - Terrain and object generation per chunk
//! - Chunk and player stores with on-disk persistence
//! - Background chunk preloading around a moving viewer

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod biome;
pub mod chunk;
pub mod chunk_store;
pub mod generation;
pub mod loader;
pub mod noise;
pub mod persistence;
pub mod placement;
pub mod player_store;
pub mod terrain;
pub mod world;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::biome::*;
    pub use crate::chunk::*;
    pub use crate::chunk_store::*;
    pub use crate::generation::*;
    pub use crate::loader::*;
    pub use crate::noise::*;
    pub use crate::persistence::*;
    pub use crate::placement::*;
    pub use crate::player_store::*;
    pub use crate::terrain::*;
    pub use crate::world::*;
}

pub use prelude::*;
