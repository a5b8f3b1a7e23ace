//! Durable storage for worlds.
//!
//! Layout under the store root:
//! - `<world>/<world>.json` - world metadata
//! - `<world>/chunks/<x>,<y>.json` - one file per chunk
//! - `<world>/playerdata/<username>.json` - one file per player
//!
//! All files are JSON. Disk writes are atomic (temp file + rename).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tileworld_common::ChunkCoord;
use tracing::debug;

use crate::chunk::ChunkState;
use crate::player_store::PlayerState;
use crate::world::WorldMeta;

/// Errors that can occur while reading or writing world files.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Decoding failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A world or player name cannot be used as a file name
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Temp file could not be moved into place
    #[error("Atomic write failed: {0}")]
    AtomicWriteFailed(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Minimal file abstraction over relative paths.
pub trait FileStore: Send + Sync + std::fmt::Debug {
    /// Whether a file exists.
    fn exists(&self, path: &Path) -> bool;

    /// Reads a whole file.
    fn read(&self, path: &Path) -> PersistenceResult<Vec<u8>>;

    /// Replaces a file's contents, creating parent directories as needed.
    fn write(&self, path: &Path, bytes: &[u8]) -> PersistenceResult<()>;
}

/// File store rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileStore for DiskFileStore {
    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).is_file()
    }

    fn read(&self, path: &Path) -> PersistenceResult<Vec<u8>> {
        let full = self.root.join(path);
        match fs::read(&full) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::NotFound(path.to_path_buf()))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
        let final_path = self.root.join(path);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp_name = final_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(bytes)?;
            writer.flush()?;
        }

        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            PersistenceError::AtomicWriteFailed(e.to_string())
        })
    }
}

/// In-memory file store for tests and diskless clients.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether no file has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl FileStore for MemoryFileStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn read(&self, path: &Path) -> PersistenceResult<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(path.to_path_buf()))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
        self.files.write().insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }
}

/// Checks that a name can be used as a single path component.
pub fn validate_name(name: &str) -> PersistenceResult<()> {
    if name.is_empty() {
        return Err(PersistenceError::InvalidName("Empty name".to_string()));
    }
    if name.starts_with('.') {
        return Err(PersistenceError::InvalidName(format!(
            "Name '{name}' may not start with '.'"
        )));
    }

    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    for c in invalid_chars {
        if name.contains(c) {
            return Err(PersistenceError::InvalidName(format!(
                "Invalid character '{c}' in name"
            )));
        }
    }
    if name.chars().any(char::is_control) {
        return Err(PersistenceError::InvalidName(
            "Control character in name".to_string(),
        ));
    }

    Ok(())
}

/// One world's files inside a [`FileStore`].
#[derive(Debug, Clone)]
pub struct WorldPersistence {
    store: Arc<dyn FileStore>,
    world: String,
}

impl WorldPersistence {
    /// Binds a world name to a store.
    pub fn new(store: Arc<dyn FileStore>, world: impl Into<String>) -> PersistenceResult<Self> {
        let world = world.into();
        validate_name(&world)?;
        Ok(Self { store, world })
    }

    /// World name.
    #[must_use]
    pub fn world_name(&self) -> &str {
        &self.world
    }

    /// Path of the metadata file.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        Path::new(&self.world).join(format!("{}.json", self.world))
    }

    /// Path of a chunk file.
    #[must_use]
    pub fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        Path::new(&self.world)
            .join("chunks")
            .join(format!("{coord}.json"))
    }

    /// Path of a player file.
    pub fn player_path(&self, username: &str) -> PersistenceResult<PathBuf> {
        validate_name(username)?;
        Ok(Path::new(&self.world)
            .join("playerdata")
            .join(format!("{username}.json")))
    }

    /// Whether the world has saved metadata.
    #[must_use]
    pub fn has_meta(&self) -> bool {
        self.store.exists(&self.meta_path())
    }

    /// Loads world metadata, if saved.
    pub fn load_meta(&self) -> PersistenceResult<Option<WorldMeta>> {
        self.read_json(&self.meta_path())
    }

    /// Saves world metadata.
    pub fn save_meta(&self, meta: &WorldMeta) -> PersistenceResult<()> {
        self.write_json(&self.meta_path(), meta)
    }

    /// Loads a chunk, if saved.
    pub fn load_chunk(&self, coord: ChunkCoord) -> PersistenceResult<Option<ChunkState>> {
        let chunk: Option<ChunkState> = self.read_json(&self.chunk_path(coord))?;
        match chunk {
            Some(chunk) if chunk.key != coord => Err(PersistenceError::Deserialization(format!(
                "chunk file {coord} holds chunk {}",
                chunk.key
            ))),
            other => Ok(other),
        }
    }

    /// Saves a chunk.
    pub fn save_chunk(&self, chunk: &ChunkState) -> PersistenceResult<()> {
        self.write_json(&self.chunk_path(chunk.key), chunk)
    }

    /// Loads a player, if saved.
    pub fn load_player(&self, username: &str) -> PersistenceResult<Option<PlayerState>> {
        self.read_json(&self.player_path(username)?)
    }

    /// Saves a player.
    pub fn save_player(&self, player: &PlayerState) -> PersistenceResult<()> {
        self.write_json(&self.player_path(&player.username)?, player)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> PersistenceResult<Option<T>> {
        let bytes = match self.store.read(path) {
            Ok(bytes) => bytes,
            Err(PersistenceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::Deserialization(format!("{}: {e}", path.display())))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> PersistenceResult<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        self.store.write(path, &bytes)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{tiles, ObjectType, TileGrid, WorldObject};
    use tileworld_common::TileCoord;

    fn sample_chunk(coord: ChunkCoord) -> ChunkState {
        let tree = WorldObject::spawn(ObjectType::Tree, coord.origin_tile());
        let flower = WorldObject::spawn(
            ObjectType::Flower,
            TileCoord::new(coord.origin_tile().x + 2, coord.origin_tile().y + 3),
        );
        ChunkState::new(coord, TileGrid::filled(tiles::SAND), vec![tree, flower])
    }

    #[test]
    fn test_layout_paths() {
        let persistence =
            WorldPersistence::new(Arc::new(MemoryFileStore::new()), "alpha").expect("valid name");
        assert_eq!(persistence.meta_path(), PathBuf::from("alpha/alpha.json"));
        assert_eq!(
            persistence.chunk_path(ChunkCoord::new(-2, 5)),
            PathBuf::from("alpha/chunks/-2,5.json")
        );
        assert_eq!(
            persistence.player_path("bob").expect("valid name"),
            PathBuf::from("alpha/playerdata/bob.json")
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("c:d").is_err());
        assert!(validate_name("alice_01").is_ok());
        assert!(WorldPersistence::new(Arc::new(MemoryFileStore::new()), "x\\y").is_err());
    }

    #[test]
    fn test_chunk_roundtrip_on_disk() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Arc::new(DiskFileStore::new(dir.path()));
        let persistence = WorldPersistence::new(store, "world").expect("valid name");

        let coord = ChunkCoord::new(3, -1);
        let chunk = sample_chunk(coord);
        persistence.save_chunk(&chunk).expect("save failed");

        assert!(dir.path().join("world/chunks/3,-1.json").is_file());
        assert!(!dir.path().join("world/chunks/3,-1.json.tmp").exists());

        let loaded = persistence
            .load_chunk(coord)
            .expect("load failed")
            .expect("chunk missing");
        assert!(loaded.same_content(&chunk));
    }

    #[test]
    fn test_missing_files_are_none() {
        let persistence =
            WorldPersistence::new(Arc::new(MemoryFileStore::new()), "w").expect("valid name");
        assert!(persistence.load_meta().expect("read failed").is_none());
        assert!(persistence
            .load_chunk(ChunkCoord::new(0, 0))
            .expect("read failed")
            .is_none());
        assert!(persistence.load_player("nobody").expect("read failed").is_none());
    }

    #[test]
    fn test_corrupt_chunk_is_error() {
        let store = Arc::new(MemoryFileStore::new());
        let persistence = WorldPersistence::new(store.clone(), "w").expect("valid name");
        store
            .write(&persistence.chunk_path(ChunkCoord::new(0, 0)), b"{not json")
            .expect("write failed");
        assert!(matches!(
            persistence.load_chunk(ChunkCoord::new(0, 0)),
            Err(PersistenceError::Deserialization(_))
        ));
    }

    #[test]
    fn test_misfiled_chunk_is_error() {
        let store = Arc::new(MemoryFileStore::new());
        let persistence = WorldPersistence::new(store.clone(), "w").expect("valid name");
        let chunk = sample_chunk(ChunkCoord::new(1, 1));
        let bytes = serde_json::to_vec(&chunk).expect("serialize failed");
        store
            .write(&persistence.chunk_path(ChunkCoord::new(9, 9)), &bytes)
            .expect("write failed");
        assert!(persistence.load_chunk(ChunkCoord::new(9, 9)).is_err());
    }

    #[test]
    fn test_disk_overwrite_replaces_content() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = DiskFileStore::new(dir.path());
        let path = Path::new("w/file.json");
        store.write(path, b"one").expect("write failed");
        store.write(path, b"two").expect("write failed");
        assert_eq!(store.read(path).expect("read failed"), b"two");
        assert!(store.exists(path));
        assert!(matches!(
            store.read(Path::new("w/none.json")),
            Err(PersistenceError::NotFound(_))
        ));
    }
}
