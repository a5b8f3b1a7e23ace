//! # Tileworld Net
//!
//! Networking for Tileworld.
//!
//! This crate handles:
//! - The message catalog and its length-prefixed frame codec
//! - The authoritative connection manager ([`Server`])
//! - The session client with chunk and player mirrors ([`SessionClient`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod events;
pub mod protocol;
pub mod server;

#[cfg(test)]
mod e2e_tests;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::auth::*;
    pub use crate::client::*;
    pub use crate::codec::{read_frame, write_message, RawFrame, HEADER_LEN, MAX_FRAME_LEN};
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::protocol::*;
    pub use crate::server::*;
}

pub use prelude::*;
