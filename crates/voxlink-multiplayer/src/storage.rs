//! Persistent key-value storage for chunks and world metadata.
//!
//! The store is a set of named collections, each a flat map from string keys
//! to byte values. Chunks are saved under [`CHUNK_COLLECTION`] keyed by
//! [`ChunkCoord::storage_key`], serialized with `postcard` and compressed
//! with LZ4. The world descriptor lives under [`WORLD_COLLECTION`].

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use voxlink_voxel::{ChunkCoord, ChunkSnapshot};

/// Collection holding one entry per saved chunk.
pub const CHUNK_COLLECTION: &str = "chunks";
/// Collection holding world-level records.
pub const WORLD_COLLECTION: &str = "world";
/// Key of the [`WorldDescriptor`] in [`WORLD_COLLECTION`].
pub const DESCRIPTOR_KEY: &str = "descriptor";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors from store access and record decoding.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(String),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
}

/// Boxed future returned by [`KeyValueStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Async key-value store with named collections.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()>;

    /// Removes a key. Returns `true` if it existed.
    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, bool>;

    /// All keys of a collection, sorted.
    fn list_keys<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store kept entirely in memory. Used by tests and throwaway worlds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<FxHashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let collections = self.collections.read().await;
            Ok(collections.get(collection).and_then(|c| c.get(key)).cloned())
        })
    }

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut collections = self.collections.write().await;
            Ok(collections
                .get_mut(collection)
                .is_some_and(|c| c.remove(key).is_some()))
        })
    }

    fn list_keys<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let collections = self.collections.read().await;
            Ok(collections
                .get(collection)
                .map(|c| c.keys().cloned().collect())
                .unwrap_or_default())
        })
    }
}

// ---------------------------------------------------------------------------
// Directory store
// ---------------------------------------------------------------------------

/// Store backed by a directory: one sub-directory per collection, one file
/// per key.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, collection: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(collection)?;
        validate_key(key)?;
        Ok(self.root.join(collection).join(key))
    }
}

/// Keys become file names, so only a conservative character set is allowed.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ',' | '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

impl KeyValueStore for DirStore {
    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let path = self.path(collection, key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.path(collection, key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Write-then-rename so readers never see a torn file.
            let mut tmp = path.clone().into_os_string();
            tmp.push(".tmp");
            tokio::fs::write(&tmp, &value).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.path(collection, key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_keys<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            validate_key(collection)?;
            let dir = self.root.join(collection);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };
            let mut keys = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                if let Some(name) = file_name.to_str()
                    && validate_key(name).is_ok()
                    && !name.ends_with(".tmp")
                {
                    keys.push(name.to_string());
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// World-level metadata stored alongside the chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDescriptor {
    pub format_version: u32,
    pub name: String,
    pub seed: u64,
    pub spawn: [f32; 3],
}

impl WorldDescriptor {
    pub fn new(name: impl Into<String>, seed: u64, spawn: [f32; 3]) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            name: name.into(),
            seed,
            spawn,
        }
    }
}

/// Serializes and compresses a chunk snapshot.
pub fn encode_chunk(snapshot: &ChunkSnapshot) -> Result<Vec<u8>, StoreError> {
    let raw = postcard::to_allocvec(snapshot).map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(compress_prepend_size(&raw))
}

/// Inverse of [`encode_chunk`].
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkSnapshot, StoreError> {
    let raw = decompress_size_prepended(bytes).map_err(|e| StoreError::Decode(e.to_string()))?;
    postcard::from_bytes(&raw).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Saves one chunk.
pub async fn save_chunk(
    store: &dyn KeyValueStore,
    snapshot: &ChunkSnapshot,
) -> Result<(), StoreError> {
    let bytes = encode_chunk(snapshot)?;
    store
        .put(CHUNK_COLLECTION, &snapshot.coord.storage_key(), bytes)
        .await
}

/// Loads one chunk, or `None` if it was never saved.
pub async fn load_chunk(
    store: &dyn KeyValueStore,
    coord: ChunkCoord,
) -> Result<Option<ChunkSnapshot>, StoreError> {
    let Some(bytes) = store.get(CHUNK_COLLECTION, &coord.storage_key()).await? else {
        return Ok(None);
    };
    let snapshot = decode_chunk(&bytes)?;
    if snapshot.coord != coord {
        return Err(StoreError::Decode(format!(
            "chunk stored under {coord} claims to be {}",
            snapshot.coord
        )));
    }
    Ok(Some(snapshot))
}

/// Coordinates of every saved chunk.
pub async fn saved_chunks(store: &dyn KeyValueStore) -> Result<Vec<ChunkCoord>, StoreError> {
    let keys = store.list_keys(CHUNK_COLLECTION).await?;
    Ok(keys
        .iter()
        .filter_map(|k| ChunkCoord::from_storage_key(k))
        .collect())
}

pub async fn save_descriptor(
    store: &dyn KeyValueStore,
    descriptor: &WorldDescriptor,
) -> Result<(), StoreError> {
    let bytes = postcard::to_allocvec(descriptor).map_err(|e| StoreError::Encode(e.to_string()))?;
    store.put(WORLD_COLLECTION, DESCRIPTOR_KEY, bytes).await
}

pub async fn load_descriptor(
    store: &dyn KeyValueStore,
) -> Result<Option<WorldDescriptor>, StoreError> {
    let Some(bytes) = store.get(WORLD_COLLECTION, DESCRIPTOR_KEY).await? else {
        return Ok(None);
    };
    let descriptor: WorldDescriptor =
        postcard::from_bytes(&bytes).map_err(|e| StoreError::Decode(e.to_string()))?;
    if descriptor.format_version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(descriptor.format_version));
    }
    Ok(Some(descriptor))
}

/// Loads the descriptor, writing `default` first if the store has none.
pub async fn load_or_create_descriptor(
    store: &dyn KeyValueStore,
    default: WorldDescriptor,
) -> Result<WorldDescriptor, StoreError> {
    if let Some(existing) = load_descriptor(store).await? {
        return Ok(existing);
    }
    save_descriptor(store, &default).await?;
    tracing::info!("Created world descriptor for {:?}", default.name);
    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlink_voxel::{AIR_KEY, CHUNK_VOLUME, SnapshotCells};

    fn snapshot(coord: ChunkCoord) -> ChunkSnapshot {
        let mut cells = vec![0u16; CHUNK_VOLUME];
        cells[100] = 1;
        ChunkSnapshot {
            coord,
            palette: vec![AIR_KEY.into(), "stone#default".into()],
            cells: SnapshotCells::Cells(cells),
        }
    }

    async fn exercise_store(store: &dyn KeyValueStore) {
        assert_eq!(store.get("things", "a").await.unwrap(), None);
        store.put("things", "b", vec![2]).await.unwrap();
        store.put("things", "a", vec![1]).await.unwrap();
        store.put("other", "c", vec![3]).await.unwrap();
        assert_eq!(store.get("things", "a").await.unwrap(), Some(vec![1]));
        assert_eq!(store.list_keys("things").await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("things", "a").await.unwrap());
        assert!(!store.delete("things", "a").await.unwrap());
        assert_eq!(store.list_keys("things").await.unwrap(), vec!["b"]);
        assert!(store.list_keys("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_dir_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());
        exercise_store(&store).await;
        assert!(dir.path().join("things").join("b").exists());
    }

    #[tokio::test]
    async fn test_dir_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());
        assert!(matches!(
            store.put("things", "../escape", vec![]).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get("", "a").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_round_trip_through_store() {
        let store = MemoryStore::new();
        let coord = ChunkCoord::new(-3, 1, 7);
        let original = snapshot(coord);
        save_chunk(&store, &original).await.unwrap();
        assert_eq!(load_chunk(&store, coord).await.unwrap(), Some(original));
        assert_eq!(load_chunk(&store, ChunkCoord::new(0, 0, 0)).await.unwrap(), None);
        assert_eq!(saved_chunks(&store).await.unwrap(), vec![coord]);
    }

    #[test]
    fn test_chunk_encoding_compresses() {
        let snapshot = snapshot(ChunkCoord::new(0, 0, 0));
        let bytes = encode_chunk(&snapshot).unwrap();
        assert!(bytes.len() < CHUNK_VOLUME);
        assert_eq!(decode_chunk(&bytes).unwrap(), snapshot);
        assert!(decode_chunk(&bytes[..bytes.len() / 2]).is_err());
    }

    #[tokio::test]
    async fn test_mismatched_chunk_key_is_rejected() {
        let store = MemoryStore::new();
        let bytes = encode_chunk(&snapshot(ChunkCoord::new(1, 1, 1))).unwrap();
        store
            .put(CHUNK_COLLECTION, &ChunkCoord::new(2, 2, 2).storage_key(), bytes)
            .await
            .unwrap();
        assert!(matches!(
            load_chunk(&store, ChunkCoord::new(2, 2, 2)).await,
            Err(StoreError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_descriptor_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());
        let alpha = WorldDescriptor::new("alpha", 42, [0.0, 40.0, 0.0]);
        let first = load_or_create_descriptor(&store, alpha).await.unwrap();
        let beta = WorldDescriptor::new("beta", 7, [1.0, 1.0, 1.0]);
        let second = load_or_create_descriptor(&store, beta).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.name, "alpha");
    }
}
