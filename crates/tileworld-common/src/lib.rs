//! # Tileworld Common
//!
//! Common types, utilities, and shared abstractions for Tileworld.
//!
//! This crate provides foundational types used by both the server and the client:
//! - Coordinate types (tile, chunk, local)
//! - ID types (ObjectId, ConnectionId)
//! - Version information for save files
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::version::*;
}

pub use prelude::*;
