//! Chunk cache with generate-on-miss and durable storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tileworld_common::{ChunkCoord, ObjectId, WorldError, WorldResult};
use tracing::{debug, info, warn};

use crate::chunk::{ChunkState, UpdateOutcome, WorldObjectUpdate};
use crate::generation::WorldGenerator;
use crate::persistence::WorldPersistence;

/// Coordinate → chunk map.
///
/// Lookups go cache → storage → generator. The map entry stays locked while
/// it is filled, so concurrent requests for one coordinate yield one chunk.
///
/// An object id lives in at most one resident chunk. Object deltas are
/// applied one at a time so a move between chunks never exposes two copies.
#[derive(Debug)]
pub struct ChunkStore {
    /// Resident chunks
    chunks: DashMap<ChunkCoord, ChunkState>,
    /// Generator for misses; `None` in mirror mode
    generator: Option<WorldGenerator>,
    /// Durable storage
    persistence: Option<Arc<WorldPersistence>>,
    /// Chunks produced by the generator
    generated: AtomicUsize,
    /// Serializes object deltas
    updates: Mutex<()>,
}

impl ChunkStore {
    /// Creates an authoritative store that generates missing chunks.
    #[must_use]
    pub fn new(generator: WorldGenerator, persistence: Option<Arc<WorldPersistence>>) -> Self {
        Self {
            chunks: DashMap::new(),
            generator: Some(generator),
            persistence,
            generated: AtomicUsize::new(0),
            updates: Mutex::new(()),
        }
    }

    /// Creates a mirror store: misses fall back to storage only.
    #[must_use]
    pub fn mirror(persistence: Option<Arc<WorldPersistence>>) -> Self {
        Self {
            chunks: DashMap::new(),
            generator: None,
            persistence,
            generated: AtomicUsize::new(0),
            updates: Mutex::new(()),
        }
    }

    /// Gets a chunk, loading or generating it on a miss.
    ///
    /// A miss holds the write lock of the coordinate's map shard through the
    /// storage read and generation. Other chunks in that shard block until it
    /// is filled; in exchange a chunk is never generated twice.
    pub fn get_chunk(&self, coord: ChunkCoord) -> WorldResult<ChunkState> {
        if let Some(chunk) = self.chunks.get(&coord) {
            return Ok(chunk.clone());
        }

        let (chunk, fresh) = match self.chunks.entry(coord) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (chunk, fresh) = match self.load_from_storage(coord) {
                    Some(chunk) => (chunk, false),
                    None => {
                        let generator = self.generator.as_ref().ok_or(WorldError::ChunkNotFound {
                            x: coord.x,
                            y: coord.y,
                        })?;
                        (generator.generate_chunk(coord), true)
                    },
                };
                entry.insert(chunk.clone());
                (chunk, fresh)
            },
        };

        if fresh {
            self.generated.fetch_add(1, Ordering::Relaxed);
            self.persist(&chunk);
        }
        Ok(chunk)
    }

    /// Returns a resident chunk without loading.
    #[must_use]
    pub fn get_if_loaded(&self, coord: ChunkCoord) -> Option<ChunkState> {
        self.chunks.get(&coord).map(|c| c.clone())
    }

    /// Stores a chunk received from elsewhere, replacing any resident copy.
    pub fn insert_chunk(&self, chunk: ChunkState) {
        self.persist(&chunk);
        self.chunks.insert(chunk.key, chunk);
    }

    /// Applies an object delta and persists every chunk it touched.
    ///
    /// The delta is routed to the chunk that currently holds the object. A
    /// move into another chunk takes the object out of its old chunk; if the
    /// destination is not resident the move is rejected and nothing changes.
    /// Spawns and removals of unknown ids go to the chunk under the target tile.
    pub fn apply_update(&self, update: &WorldObjectUpdate) -> WorldResult<UpdateOutcome> {
        let _serial = self.updates.lock();
        let target = update.chunk();

        let in_target = self
            .chunks
            .get(&target)
            .is_some_and(|chunk| chunk.object(update.object_id).is_some());
        if !in_target {
            if let Some(source) = self.holder_of(update.object_id, target) {
                return if update.removed {
                    self.apply_in(source, update)
                } else {
                    self.transfer(source, update)
                };
            }
        }
        self.apply_in(target, update)
    }

    /// Resident chunk other than `skip` that holds `id`.
    fn holder_of(&self, id: ObjectId, skip: ChunkCoord) -> Option<ChunkCoord> {
        self.chunks
            .iter()
            .find(|entry| *entry.key() != skip && entry.object(id).is_some())
            .map(|entry| *entry.key())
    }

    fn apply_in(
        &self,
        coord: ChunkCoord,
        update: &WorldObjectUpdate,
    ) -> WorldResult<UpdateOutcome> {
        let mut chunk = self.chunks.get_mut(&coord).ok_or(not_loaded(coord))?;

        let outcome = chunk.apply_update(update);
        if outcome.changed() {
            let snapshot = chunk.clone();
            drop(chunk);
            self.persist(&snapshot);
        }
        Ok(outcome)
    }

    /// Moves an object from `source` into the chunk under the update's tile.
    fn transfer(
        &self,
        source: ChunkCoord,
        update: &WorldObjectUpdate,
    ) -> WorldResult<UpdateOutcome> {
        let target = update.chunk();
        if !self.chunks.contains_key(&target) {
            return Err(not_loaded(target));
        }

        // Two entries may share a shard, so the chunks are locked one after the other.
        let (mut object, source_snapshot) = {
            let mut chunk = self.chunks.get_mut(&source).ok_or(not_loaded(source))?;
            let Some(object) = chunk.take_object(update.object_id) else {
                drop(chunk);
                return self.apply_in(target, update);
            };
            (object, chunk.clone())
        };
        let origin = object.tile();
        object.tile_x = update.tile_x;
        object.tile_y = update.tile_y;

        let target_snapshot = match self.chunks.get_mut(&target) {
            Some(mut chunk) => {
                chunk.objects.push(object);
                chunk.clone()
            },
            None => {
                object.tile_x = origin.x;
                object.tile_y = origin.y;
                if let Some(mut chunk) = self.chunks.get_mut(&source) {
                    chunk.objects.push(object);
                }
                return Err(not_loaded(target));
            },
        };

        debug!("Object {} moved from chunk {} to {}", update.object_id, source, target);
        self.persist(&source_snapshot);
        self.persist(&target_snapshot);
        Ok(UpdateOutcome::Moved)
    }

    /// Advances the fade-in clock of every resident object.
    pub fn observe(&self, dt: f32) {
        for mut chunk in self.chunks.iter_mut() {
            chunk.observe(dt);
        }
    }

    /// Checks if a chunk is loaded.
    #[must_use]
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    /// Returns the number of loaded chunks.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns how many chunks the generator has produced.
    #[must_use]
    pub fn generated_count(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    /// Coordinates of every resident chunk.
    #[must_use]
    pub fn loaded_coords(&self) -> Vec<ChunkCoord> {
        self.chunks.iter().map(|e| *e.key()).collect()
    }

    /// Drops every resident chunk without saving.
    pub fn clear(&self) {
        self.chunks.clear();
    }

    /// Saves all resident chunks. Returns how many were written.
    pub fn save_all(&self) -> usize {
        let Some(persistence) = &self.persistence else {
            return 0;
        };

        let mut saved = 0;
        for entry in &self.chunks {
            if let Err(e) = persistence.save_chunk(entry.value()) {
                warn!("Failed to save chunk {}: {e}", entry.key());
            } else {
                saved += 1;
            }
        }
        info!("Saved {saved} chunks");
        saved
    }

    /// Loads a chunk from storage. Corrupt files are logged and treated as missing.
    fn load_from_storage(&self, coord: ChunkCoord) -> Option<ChunkState> {
        let persistence = self.persistence.as_ref()?;
        match persistence.load_chunk(coord) {
            Ok(chunk) => {
                if chunk.is_some() {
                    debug!("Loaded chunk {} from storage", coord);
                }
                chunk
            },
            Err(e) => {
                warn!("Failed to load chunk {}: {e}", coord);
                None
            },
        }
    }

    /// Writes a chunk to storage. Failures leave the in-memory copy in place.
    fn persist(&self, chunk: &ChunkState) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_chunk(chunk) {
                warn!("Failed to persist chunk {}: {e}", chunk.key);
            }
        }
    }
}

const fn not_loaded(coord: ChunkCoord) -> WorldError {
    WorldError::ChunkNotLoaded {
        x: coord.x,
        y: coord.y,
    }
}
