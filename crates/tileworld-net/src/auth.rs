//! Credential checks.
//!
//! Password storage and hashing live outside this crate; the server only sees
//! the [`CredentialStore`] trait. [`MemoryCredentialStore`] is a plain
//! in-process stand-in for tests and local servers.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tileworld_world::validate_name;

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Unknown user or wrong password
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Registration of an identity that already exists
    #[error("User '{0}' already exists")]
    UserExists(String),

    /// The identity cannot be used
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// The backing store failed
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Checks and registers identities.
pub trait CredentialStore: Send + Sync {
    /// Verifies a username/password pair.
    fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError>;

    /// Registers a new identity.
    fn create_user(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

/// In-memory credential table.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with pre-registered users.
    #[must_use]
    pub fn with_users<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let users = users
            .into_iter()
            .map(|(u, p)| (u.into(), p.into()))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether no user is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        match self.users.read().get(username) {
            Some(stored) if stored == password => Ok(()),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    fn create_user(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate_name(username).map_err(|e| AuthError::InvalidUsername(e.to_string()))?;

        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(AuthError::UserExists(username.to_string()));
        }
        users.insert(username.to_string(), password.to_string());
        Ok(())
    }
}
