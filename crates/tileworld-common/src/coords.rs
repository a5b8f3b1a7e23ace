//! Coordinate types for tile, chunk, and local positions.

use serde::{Deserialize, Serialize};

/// Width and height of a chunk in tiles.
pub const CHUNK_SIZE: u32 = 16;

/// Number of tiles in a chunk.
pub const CHUNK_AREA: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Side length of one tile in world units.
pub const TILE_SIZE: f64 = 32.0;

/// Tile coordinate (global position in the tile grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// X coordinate in tile space
    pub x: i32,
    /// Y coordinate in tile space
    pub y: i32,
}

impl TileCoord {
    /// Creates a new tile coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Converts to the chunk containing this tile.
    #[must_use]
    pub const fn to_chunk_coord(self) -> ChunkCoord {
        let size = CHUNK_SIZE as i32;
        ChunkCoord {
            x: self.x.div_euclid(size),
            y: self.y.div_euclid(size),
        }
    }

    /// Converts to local coordinate within its chunk.
    #[must_use]
    pub const fn to_local_coord(self) -> LocalCoord {
        let size = CHUNK_SIZE as i32;
        LocalCoord {
            x: self.x.rem_euclid(size) as u8,
            y: self.y.rem_euclid(size) as u8,
        }
    }

    /// World-unit position of this tile's centre.
    #[must_use]
    pub fn world_center(self) -> (f64, f64) {
        (
            (f64::from(self.x) + 0.5) * TILE_SIZE,
            (f64::from(self.y) + 0.5) * TILE_SIZE,
        )
    }

    /// Tile containing a world-unit position.
    #[must_use]
    pub fn from_world(x: f64, y: f64) -> Self {
        Self::new((x / TILE_SIZE).floor() as i32, (y / TILE_SIZE).floor() as i32)
    }

    /// Euclidean distance to another tile.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Chunk coordinate (identifies a chunk in the world grid).
///
/// Displayed as `x,y`, which is also the chunk's file stem on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Y coordinate in chunk space
    pub y: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the chunk containing the given tile.
    #[must_use]
    pub const fn from_tile(tile_x: i32, tile_y: i32) -> Self {
        TileCoord::new(tile_x, tile_y).to_chunk_coord()
    }

    /// Converts to tile coordinate (top-left corner of chunk).
    #[must_use]
    pub const fn origin_tile(self) -> TileCoord {
        let size = CHUNK_SIZE as i32;
        TileCoord {
            x: self.x * size,
            y: self.y * size,
        }
    }

    /// Tile coordinate of a local position inside this chunk.
    #[must_use]
    pub const fn tile_at(self, local: LocalCoord) -> TileCoord {
        let origin = self.origin_tile();
        TileCoord {
            x: origin.x + local.x as i32,
            y: origin.y + local.y as i32,
        }
    }

    /// Chebyshev distance in chunks.
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// All chunk coordinates in the square of the given radius around this one,
    /// ordered by ring (centre first).
    #[must_use]
    pub fn square_around(self, radius: u32) -> Vec<Self> {
        let r = radius as i32;
        let mut coords = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dy in -r..=r {
            for dx in -r..=r {
                coords.push(Self::new(self.x + dx, self.y + dy));
            }
        }
        coords.sort_by_key(|c| c.chebyshev_distance(self));
        coords
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Local coordinate within a chunk (0 to CHUNK_SIZE-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalCoord {
    /// X coordinate within chunk
    pub x: u8,
    /// Y coordinate within chunk
    pub y: u8,
}

impl LocalCoord {
    /// Creates a new local coordinate.
    #[must_use]
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Converts to linear index for array access.
    #[must_use]
    pub const fn to_index(self) -> usize {
        (self.y as usize) * (CHUNK_SIZE as usize) + (self.x as usize)
    }

    /// Creates from linear index.
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        let size = CHUNK_SIZE as usize;
        Self {
            x: (index % size) as u8,
            y: (index / size) as u8,
        }
    }
}
