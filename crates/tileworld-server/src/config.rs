//! Server configuration file.
//!
//! Loaded from TOML. Missing fields take defaults; a missing or unreadable
//! file falls back to defaults with a warning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tileworld_net::ServerConfig;
use tileworld_world::DEFAULT_MIN_SPACING;
use tracing::{info, warn};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "tileworld-server.toml";

/// Everything the dedicated server reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerFileConfig {
    /// Listener and tick settings
    pub server: ServerConfig,
    /// World to host
    pub world: WorldSection,
    /// Pre-registered accounts
    pub accounts: Vec<Account>,
}

/// World settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSection {
    /// World name (directory under `save_dir`)
    pub name: String,
    /// Root directory for saves
    pub save_dir: PathBuf,
    /// Seed for a new world (None = random)
    pub seed: Option<u64>,
    /// RON biome table (None = built-in biomes)
    pub biomes: Option<PathBuf>,
    /// Minimum distance between spaced objects, in tiles
    pub min_spacing: f32,
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            save_dir: PathBuf::from("saves"),
            seed: None,
            biomes: None,
            min_spacing: DEFAULT_MIN_SPACING,
        }
    }
}

/// A username/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Identity
    pub username: String,
    /// Secret
    pub password: String,
}

impl ServerFileConfig {
    /// Loads configuration from a path.
    /// Returns defaults if the file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("Failed to parse config file: {e}");
                    Self::default()
                },
            },
            Err(e) => {
                warn!("Failed to read config file: {e}");
                Self::default()
            },
        }
    }

    /// Saves configuration to a path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamps values to sensible ranges.
    pub fn validate(&mut self) {
        self.server.tick_rate = self.server.tick_rate.clamp(1, 120);
        self.server.login_chunk_radius = self.server.login_chunk_radius.min(8);
        self.world.min_spacing = self.world.min_spacing.clamp(0.0, 16.0);

        let before = self.accounts.len();
        self.accounts.retain(|a| !a.username.is_empty());
        if self.accounts.len() != before {
            warn!("Ignoring {} accounts with empty usernames", before - self.accounts.len());
        }
    }
}
