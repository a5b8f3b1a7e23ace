//! Object scattering over generated chunks.

use tileworld_common::{ChunkCoord, LocalCoord, CHUNK_AREA, CHUNK_SIZE};
use tracing::trace;

use crate::biome::Biome;
use crate::chunk::{TileGrid, WorldObject};

/// Minimum distance in tiles between spaced objects (trees, cacti).
pub const DEFAULT_MIN_SPACING: f32 = 3.0;

/// Object placement settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementConfig {
    /// Minimum Euclidean spacing between spaced objects, in tiles.
    pub min_spacing: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            min_spacing: DEFAULT_MIN_SPACING,
        }
    }
}

/// Seed of the placement stream for a chunk: `(x*341 + y*773) ^ seed`.
#[must_use]
pub fn placement_seed(coord: ChunkCoord, seed: u64) -> u64 {
    let mixed = i64::from(coord.x) * 341 + i64::from(coord.y) * 773;
    (mixed as u64) ^ seed
}

/// Places objects for a chunk from its biome's spawn table.
#[derive(Debug, Clone, Default)]
pub struct ObjectPlacer {
    config: PlacementConfig,
}

impl ObjectPlacer {
    /// Creates a placer.
    #[must_use]
    pub const fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    /// Placement settings.
    #[must_use]
    pub const fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Scatters the biome's spawnable objects over a chunk.
    ///
    /// Each type gets `floor(chance * 256)` attempts at random tiles. An attempt
    /// succeeds only on an allowed, unoccupied tile and, for spaced types, away
    /// from every spaced object already placed.
    #[must_use]
    pub fn place_objects(
        &self,
        coord: ChunkCoord,
        tiles: &TileGrid,
        biome: &Biome,
        seed: u64,
    ) -> Vec<WorldObject> {
        let mut rng = fastrand::Rng::with_seed(placement_seed(coord, seed));
        let mut placed: Vec<WorldObject> = Vec::new();

        for &object_type in &biome.spawnable_objects {
            let attempts = (biome.spawn_chance(object_type) * CHUNK_AREA as f64).floor() as usize;

            for _ in 0..attempts {
                let local = LocalCoord::new(
                    rng.u8(0..CHUNK_SIZE as u8),
                    rng.u8(0..CHUNK_SIZE as u8),
                );
                if !biome.allows_tile(tiles.get(local)) {
                    continue;
                }

                let tile = coord.tile_at(local);
                if placed.iter().any(|o| o.tile() == tile) {
                    continue;
                }
                let min_spacing = self.config.min_spacing;
                if object_type.is_spaced()
                    && placed
                        .iter()
                        .any(|o| o.object_type.is_spaced() && o.tile().distance(tile) < min_spacing)
                {
                    continue;
                }

                placed.push(WorldObject::spawn(object_type, tile));
            }
        }

        trace!("Placed {} objects in chunk {}", placed.len(), coord);
        placed
    }
}
