//! Procedural world generation.

use std::sync::Arc;

use tileworld_common::ChunkCoord;
use tracing::debug;

use crate::biome::{BiomeEngine, BiomeRegistry};
use crate::chunk::ChunkState;
use crate::placement::{ObjectPlacer, PlacementConfig, DEFAULT_MIN_SPACING};
use crate::terrain::TerrainGenerator;

/// World generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// World seed
    pub seed: u64,
    /// Minimum spacing between spaced objects, in tiles
    pub min_spacing: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            min_spacing: DEFAULT_MIN_SPACING,
        }
    }
}

/// Procedural world generator: biome, then terrain, then objects.
#[derive(Debug, Clone)]
pub struct WorldGenerator {
    /// Configuration
    config: GeneratorConfig,
    /// Tile generation
    terrain: TerrainGenerator,
    /// Object scattering
    placer: ObjectPlacer,
}

impl WorldGenerator {
    /// Creates a new generator with the given config and biome table.
    #[must_use]
    pub fn new(config: GeneratorConfig, registry: Arc<BiomeRegistry>) -> Self {
        let engine = Arc::new(BiomeEngine::new(config.seed, registry));
        let placer = ObjectPlacer::new(PlacementConfig {
            min_spacing: config.min_spacing,
        });

        Self {
            config,
            terrain: TerrainGenerator::new(engine),
            placer,
        }
    }

    /// Creates a generator with default config and the built-in biomes.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::new(
            GeneratorConfig {
                seed,
                ..Default::default()
            },
            Arc::new(BiomeRegistry::default()),
        )
    }

    /// Generates a chunk at the given coordinate.
    #[must_use]
    pub fn generate_chunk(&self, coord: ChunkCoord) -> ChunkState {
        let transition = self.terrain.chunk_transition(coord);
        let tiles = self.terrain.generate_with(coord, &transition);

        let biome = self.terrain.engine().biome(transition.primary);
        let objects = self
            .placer
            .place_objects(coord, &tiles, biome, self.config.seed);

        debug!(
            "Generated chunk {} ({:?}, {} objects)",
            coord,
            transition.primary,
            objects.len()
        );
        ChunkState::new(coord, tiles, objects)
    }

    /// The biome engine driving generation.
    #[must_use]
    pub fn biomes(&self) -> &BiomeEngine {
        self.terrain.engine()
    }

    /// Returns the generator configuration.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}
