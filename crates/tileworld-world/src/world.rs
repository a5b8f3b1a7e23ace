//! A world: metadata plus its chunk and player stores.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tileworld_common::{unix_millis, FormatVersion, TileworldResult, WorldError};
use tracing::{info, warn};

use crate::biome::BiomeRegistry;
use crate::chunk_store::ChunkStore;
use crate::generation::{GeneratorConfig, WorldGenerator};
use crate::persistence::{FileStore, WorldPersistence};
use crate::player_store::PlayerStore;

/// Saved world metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMeta {
    /// World name, also its directory name.
    pub name: String,
    /// Generation seed.
    pub seed: u64,
    /// Unix millis at creation.
    pub created_at: u64,
    /// Unix millis of the last save.
    pub last_played_at: u64,
    /// Total seconds the world has been open.
    pub played_duration: u64,
    /// On-disk format the world was written with.
    #[serde(default)]
    pub format_version: FormatVersion,
}

impl WorldMeta {
    /// Metadata for a brand-new world.
    #[must_use]
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        let now = unix_millis();
        Self {
            name: name.into(),
            seed,
            created_at: now,
            last_played_at: now,
            played_duration: 0,
            format_version: FormatVersion::CURRENT,
        }
    }
}

/// Options for opening a world.
#[derive(Debug, Clone)]
pub struct WorldOptions {
    /// Seed used when the world is created. Existing worlds keep their own.
    pub seed: u64,
    /// Minimum spacing between spaced objects, in tiles.
    pub min_spacing: f32,
    /// Biome table.
    pub biomes: Arc<BiomeRegistry>,
}

impl Default for WorldOptions {
    fn default() -> Self {
        let generator = GeneratorConfig::default();
        Self {
            seed: generator.seed,
            min_spacing: generator.min_spacing,
            biomes: Arc::new(BiomeRegistry::default()),
        }
    }
}

/// An open world.
#[derive(Debug)]
pub struct World {
    meta: WorldMeta,
    chunks: ChunkStore,
    players: PlayerStore,
    persistence: Arc<WorldPersistence>,
    last_save: Instant,
}

impl World {
    /// Opens a saved world, or creates and saves a new one.
    pub fn open_or_create(
        store: Arc<dyn FileStore>,
        name: &str,
        options: WorldOptions,
    ) -> TileworldResult<Self> {
        let persistence = Arc::new(
            WorldPersistence::new(store, name)
                .map_err(|e| WorldError::LoadFailed(e.to_string()))?,
        );

        let loaded = persistence
            .load_meta()
            .map_err(|e| WorldError::LoadFailed(e.to_string()))?;

        let (meta, created) = match loaded {
            Some(meta) => {
                FormatVersion::CURRENT.check(&meta.format_version)?;
                if meta.seed != options.seed {
                    warn!(
                        "World '{}' was created with seed {}, ignoring requested seed {}",
                        name, meta.seed, options.seed
                    );
                }
                (meta, false)
            },
            None => (WorldMeta::new(name, options.seed), true),
        };

        let generator = WorldGenerator::new(
            GeneratorConfig {
                seed: meta.seed,
                min_spacing: options.min_spacing,
            },
            options.biomes,
        );

        let world = Self {
            chunks: ChunkStore::new(generator, Some(persistence.clone())),
            players: PlayerStore::new(Some(persistence.clone())),
            meta,
            persistence,
            last_save: Instant::now(),
        };

        if created {
            world
                .persistence
                .save_meta(&world.meta)
                .map_err(|e| WorldError::SaveFailed(e.to_string()))?;
            info!("Created world '{}' (seed {})", name, world.meta.seed);
        } else {
            info!("Opened world '{}' (seed {})", name, world.meta.seed);
        }
        Ok(world)
    }

    /// Saves metadata, every resident chunk and every resident player.
    pub fn save(&mut self) -> TileworldResult<()> {
        let elapsed = self.last_save.elapsed().as_secs();
        self.last_save = Instant::now();
        self.meta.played_duration += elapsed;
        self.meta.last_played_at = unix_millis();

        self.persistence
            .save_meta(&self.meta)
            .map_err(|e| WorldError::SaveFailed(e.to_string()))?;
        let chunks = self.chunks.save_all();
        let players = self.players.save_all();
        info!(
            "Saved world '{}' ({} chunks, {} players)",
            self.meta.name, chunks, players
        );
        Ok(())
    }

    /// World metadata.
    #[must_use]
    pub const fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    /// Generation seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.meta.seed
    }

    /// Chunk store.
    #[must_use]
    pub const fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Player store.
    #[must_use]
    pub const fn players(&self) -> &PlayerStore {
        &self.players
    }

    /// Mutable player store.
    pub fn players_mut(&mut self) -> &mut PlayerStore {
        &mut self.players
    }
}
