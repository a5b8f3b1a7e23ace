//! Chunk data: tile grids, world objects, and object deltas.

use serde::{Deserialize, Serialize};
use tileworld_common::{
    unix_millis, ChunkCoord, LocalCoord, ObjectId, TileCoord, CHUNK_AREA, CHUNK_SIZE,
};

/// Numeric tile-type id.
pub type TileId = u16;

/// Built-in tile ids.
pub mod tiles {
    use super::TileId;

    /// Short grass.
    pub const GRASS: TileId = 1;
    /// Tall grass.
    pub const TALL_GRASS: TileId = 2;
    /// Bare dirt.
    pub const DIRT: TileId = 3;
    /// Sand.
    pub const SAND: TileId = 4;
    /// Dry, cracked ground.
    pub const DRY_EARTH: TileId = 5;
    /// Snow.
    pub const SNOW: TileId = 6;
    /// Ice sheet.
    pub const ICE: TileId = 7;

    /// Tile used when no biome distribution can be resolved.
    pub const DEFAULT: TileId = GRASS;
}

/// Square grid of tile ids, row-major. Serialized as a flat array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TileId>", into = "Vec<TileId>")]
pub struct TileGrid {
    tiles: Vec<TileId>,
}

impl TileGrid {
    /// Creates a grid filled with one tile id.
    #[must_use]
    pub fn filled(tile: TileId) -> Self {
        Self {
            tiles: vec![tile; CHUNK_AREA],
        }
    }

    /// Builds a grid from raw row-major data. Returns `None` on a size mismatch.
    #[must_use]
    pub fn from_raw(tiles: Vec<TileId>) -> Option<Self> {
        (tiles.len() == CHUNK_AREA).then_some(Self { tiles })
    }

    /// Tile at a local position.
    #[must_use]
    pub fn get(&self, local: LocalCoord) -> TileId {
        self.tiles[local.to_index()]
    }

    /// Sets the tile at a local position.
    pub fn set(&mut self, local: LocalCoord, tile: TileId) {
        self.tiles[local.to_index()] = tile;
    }

    /// Raw row-major data.
    #[must_use]
    pub fn as_slice(&self) -> &[TileId] {
        &self.tiles
    }

    /// Consumes the grid, returning raw row-major data.
    #[must_use]
    pub fn into_raw(self) -> Vec<TileId> {
        self.tiles
    }

    /// Grid side length.
    #[must_use]
    pub const fn size(&self) -> u32 {
        CHUNK_SIZE
    }
}

impl TryFrom<Vec<TileId>> for TileGrid {
    type Error = String;

    fn try_from(tiles: Vec<TileId>) -> Result<Self, Self::Error> {
        let len = tiles.len();
        Self::from_raw(tiles).ok_or_else(|| format!("expected {CHUNK_AREA} tiles, got {len}"))
    }
}

impl From<TileGrid> for Vec<TileId> {
    fn from(grid: TileGrid) -> Self {
        grid.tiles
    }
}

/// Kinds of discrete objects placed on top of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    /// Broadleaf tree.
    Tree,
    /// Snow-covered conifer.
    PineTree,
    /// Desert cactus.
    Cactus,
    /// Low shrub.
    Bush,
    /// Boulder.
    Rock,
    /// Wildflower patch; withers, so it carries a spawn time.
    Flower,
}

impl ObjectType {
    /// Wire/display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tree => "TREE",
            Self::PineTree => "PINE_TREE",
            Self::Cactus => "CACTUS",
            Self::Bush => "BUSH",
            Self::Rock => "ROCK",
            Self::Flower => "FLOWER",
        }
    }

    /// Whether placement keeps a minimum distance between objects of this category.
    #[must_use]
    pub fn is_spaced(self) -> bool {
        matches!(self, Self::Tree | Self::PineTree | Self::Cactus)
    }

    /// Whether the object blocks movement.
    #[must_use]
    pub fn is_collidable(self) -> bool {
        matches!(self, Self::Tree | Self::PineTree | Self::Cactus | Self::Rock)
    }

    /// Permanent objects have spawn time 0; the rest record when they appeared.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        !matches!(self, Self::Flower)
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A placed object with a stable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldObject {
    /// Globally unique id.
    pub id: ObjectId,
    /// Tile X in world tiles.
    pub tile_x: i32,
    /// Tile Y in world tiles.
    pub tile_y: i32,
    /// Object kind.
    pub object_type: ObjectType,
    /// Whether it blocks movement.
    pub collidable: bool,
    /// Unix millis when spawned, 0 for permanent objects.
    pub spawn_time: u64,
    /// Client-local fade-in clock; not persisted.
    #[serde(skip)]
    pub seconds_since_observed: f32,
}

impl WorldObject {
    /// Creates an object with a fresh id at a tile.
    #[must_use]
    pub fn spawn(object_type: ObjectType, tile: TileCoord) -> Self {
        Self::with_id(ObjectId::new(), object_type, tile)
    }

    /// Creates an object with a known id at a tile.
    #[must_use]
    pub fn with_id(id: ObjectId, object_type: ObjectType, tile: TileCoord) -> Self {
        Self {
            id,
            tile_x: tile.x,
            tile_y: tile.y,
            object_type,
            collidable: object_type.is_collidable(),
            spawn_time: if object_type.is_permanent() {
                0
            } else {
                unix_millis()
            },
            seconds_since_observed: 0.0,
        }
    }

    /// Tile this object stands on.
    #[must_use]
    pub const fn tile(&self) -> TileCoord {
        TileCoord::new(self.tile_x, self.tile_y)
    }
}

impl PartialEq for WorldObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.tile_x == other.tile_x
            && self.tile_y == other.tile_y
            && self.object_type == other.object_type
            && self.collidable == other.collidable
            && self.spawn_time == other.spawn_time
    }
}

/// Delta for a single world object, as batched into object broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldObjectUpdate {
    /// Object id.
    pub object_id: ObjectId,
    /// Object kind.
    pub object_type: ObjectType,
    /// Target tile X.
    pub tile_x: i32,
    /// Target tile Y.
    pub tile_y: i32,
    /// Whether the object was removed.
    pub removed: bool,
}

impl WorldObjectUpdate {
    /// Delta that spawns a new object.
    #[must_use]
    pub fn spawned(object: &WorldObject) -> Self {
        Self {
            object_id: object.id,
            object_type: object.object_type,
            tile_x: object.tile_x,
            tile_y: object.tile_y,
            removed: false,
        }
    }

    /// Delta that removes an object.
    #[must_use]
    pub fn removal(object: &WorldObject) -> Self {
        Self {
            removed: true,
            ..Self::spawned(object)
        }
    }

    /// Chunk this delta applies to.
    #[must_use]
    pub const fn chunk(&self) -> ChunkCoord {
        ChunkCoord::from_tile(self.tile_x, self.tile_y)
    }
}

/// What applying a [`WorldObjectUpdate`] did to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new object was appended.
    Added,
    /// An existing object changed position.
    Moved,
    /// An existing object was removed.
    Removed,
    /// Nothing changed (e.g. removal of an unknown id).
    Unchanged,
}

impl UpdateOutcome {
    /// Whether the chunk was modified.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// One chunk's tiles and objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkState {
    /// Chunk coordinate.
    pub key: ChunkCoord,
    /// Tile grid.
    pub tiles: TileGrid,
    /// Objects standing in this chunk.
    pub objects: Vec<WorldObject>,
}

impl ChunkState {
    /// Creates a chunk from generated parts.
    #[must_use]
    pub fn new(key: ChunkCoord, tiles: TileGrid, objects: Vec<WorldObject>) -> Self {
        Self {
            key,
            tiles,
            objects,
        }
    }

    /// Finds an object by id.
    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&WorldObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// Finds the object standing on a tile.
    #[must_use]
    pub fn object_at(&self, tile: TileCoord) -> Option<&WorldObject> {
        self.objects.iter().find(|o| o.tile() == tile)
    }

    /// Removes and returns an object by id.
    pub fn take_object(&mut self, id: ObjectId) -> Option<WorldObject> {
        let index = self.objects.iter().position(|o| o.id == id)?;
        Some(self.objects.remove(index))
    }

    /// Applies a delta: remove by id, move if the id exists, otherwise append.
    ///
    /// Only looks inside this chunk; [`ChunkStore`](crate::chunk_store::ChunkStore)
    /// routes deltas whose object lives in another chunk.
    pub fn apply_update(&mut self, update: &WorldObjectUpdate) -> UpdateOutcome {
        let position = self.objects.iter().position(|o| o.id == update.object_id);

        if update.removed {
            return match position {
                Some(index) => {
                    self.objects.remove(index);
                    UpdateOutcome::Removed
                },
                None => UpdateOutcome::Unchanged,
            };
        }

        match position {
            Some(index) => {
                let object = &mut self.objects[index];
                if object.tile_x == update.tile_x && object.tile_y == update.tile_y {
                    return UpdateOutcome::Unchanged;
                }
                object.tile_x = update.tile_x;
                object.tile_y = update.tile_y;
                UpdateOutcome::Moved
            },
            None => {
                self.objects.push(WorldObject::with_id(
                    update.object_id,
                    update.object_type,
                    TileCoord::new(update.tile_x, update.tile_y),
                ));
                UpdateOutcome::Added
            },
        }
    }

    /// Equality that ignores object order.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        if self.key != other.key
            || self.tiles != other.tiles
            || self.objects.len() != other.objects.len()
        {
            return false;
        }
        self.objects
            .iter()
            .all(|o| other.object(o.id).is_some_and(|p| p == o))
    }

    /// Advances every object's fade-in clock.
    pub fn observe(&mut self, dt: f32) {
        for object in &mut self.objects {
            object.seconds_since_observed += dt;
        }
    }
}
