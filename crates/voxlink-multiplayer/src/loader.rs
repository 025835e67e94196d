//! Asynchronous chunk loading and saving.
//!
//! Loads and saves run as spawned tasks so store latency never stalls the
//! tick. Their results come back over a channel and are applied by the
//! owner in one synchronous step. A load tries the store first and falls
//! back to the generator when the chunk was never saved.
//!
//! Saves of one chunk never overlap. A snapshot handed over while an older
//! one is still being written waits behind it, replacing any snapshot that
//! was already waiting, so the store always ends with the newest state.
//! Loads of a chunk with a save outstanding are answered from that newest
//! snapshot instead of the store.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use voxlink_voxel::{ChunkCoord, ChunkGenerator, ChunkSnapshot};
use voxlink_wire::ConnectionId;

use crate::storage::{KeyValueStore, StoreError, load_chunk, save_chunk};

/// Where a loaded chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Store,
    Generated,
}

/// A finished background operation.
#[derive(Debug)]
pub enum LoaderEvent {
    Loaded {
        coord: ChunkCoord,
        result: Result<(ChunkSnapshot, LoadSource), StoreError>,
    },
    Saved {
        coord: ChunkCoord,
        result: Result<(), StoreError>,
    },
}

/// Save state of one chunk: the snapshot being written and the newest one
/// queued behind it.
struct SaveSlot {
    writing: ChunkSnapshot,
    queued: Option<ChunkSnapshot>,
}

impl SaveSlot {
    fn newest(&self) -> &ChunkSnapshot {
        self.queued.as_ref().unwrap_or(&self.writing)
    }
}

/// Spawns chunk loads and saves and tracks who is waiting for each load.
pub struct ChunkLoader {
    store: Arc<dyn KeyValueStore>,
    generator: Arc<dyn ChunkGenerator>,
    tx: mpsc::UnboundedSender<LoaderEvent>,
    rx: mpsc::UnboundedReceiver<LoaderEvent>,
    waiters: FxHashMap<ChunkCoord, Vec<ConnectionId>>,
    saves: FxHashMap<ChunkCoord, SaveSlot>,
    saves_in_flight: usize,
}

impl ChunkLoader {
    pub fn new(store: Arc<dyn KeyValueStore>, generator: Arc<dyn ChunkGenerator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            generator,
            tx,
            rx,
            waiters: FxHashMap::default(),
            saves: FxHashMap::default(),
            saves_in_flight: 0,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Queues `requester` for `coord` and starts a load unless one is
    /// already running. Returns `true` if a new load started.
    ///
    /// Must be called within a Tokio runtime.
    pub fn request(&mut self, coord: ChunkCoord, requester: Option<ConnectionId>) -> bool {
        let started = !self.waiters.contains_key(&coord);
        let waiting = self.waiters.entry(coord).or_default();
        if let Some(id) = requester
            && !waiting.contains(&id)
        {
            waiting.push(id);
        }
        if started {
            let tx = self.tx.clone();
            if let Some(slot) = self.saves.get(&coord) {
                let snapshot = slot.newest().clone();
                tokio::spawn(async move {
                    let result = Ok((snapshot, LoadSource::Store));
                    let _ = tx.send(LoaderEvent::Loaded { coord, result });
                });
                tracing::debug!("Loading chunk {coord} from its pending save");
                return started;
            }
            let store = Arc::clone(&self.store);
            let generator = Arc::clone(&self.generator);
            tokio::spawn(async move {
                let result = match load_chunk(store.as_ref(), coord).await {
                    Ok(Some(snapshot)) => Ok((snapshot, LoadSource::Store)),
                    Ok(None) => Ok((generator.generate(coord), LoadSource::Generated)),
                    Err(e) => Err(e),
                };
                let _ = tx.send(LoaderEvent::Loaded { coord, result });
            });
            tracing::debug!("Started loading chunk {coord}");
        }
        started
    }

    pub fn is_loading(&self, coord: ChunkCoord) -> bool {
        self.waiters.contains_key(&coord)
    }

    pub fn pending_loads(&self) -> usize {
        self.waiters.len()
    }

    /// Removes and returns everyone waiting for `coord`.
    pub fn take_waiters(&mut self, coord: ChunkCoord) -> Vec<ConnectionId> {
        self.waiters.remove(&coord).unwrap_or_default()
    }

    /// Drops a disconnected requester from every wait list.
    pub fn forget_requester(&mut self, id: ConnectionId) {
        for waiting in self.waiters.values_mut() {
            waiting.retain(|w| *w != id);
        }
    }

    /// Writes a snapshot to the store in the background.
    ///
    /// If a save of the same chunk is still running, the snapshot is queued
    /// and written once that save finishes. Every call except one that
    /// replaces an already queued snapshot yields one [`LoaderEvent::Saved`].
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn_save(&mut self, snapshot: ChunkSnapshot) {
        let coord = snapshot.coord;
        if let Some(slot) = self.saves.get_mut(&coord) {
            if slot.queued.replace(snapshot).is_none() {
                self.saves_in_flight += 1;
            }
            tracing::trace!("Queued save of chunk {coord} behind a running one");
            return;
        }
        self.saves_in_flight += 1;
        self.start_write(snapshot.clone());
        self.saves.insert(
            coord,
            SaveSlot {
                writing: snapshot,
                queued: None,
            },
        );
    }

    /// Whether a save of `coord` is running or queued.
    pub fn is_saving(&self, coord: ChunkCoord) -> bool {
        self.saves.contains_key(&coord)
    }

    fn start_write(&self, snapshot: ChunkSnapshot) {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let coord = snapshot.coord;
            let result = save_chunk(store.as_ref(), &snapshot).await;
            let _ = tx.send(LoaderEvent::Saved { coord, result });
        });
    }

    pub fn saves_in_flight(&self) -> usize {
        self.saves_in_flight
    }

    /// Returns a finished operation without waiting.
    pub fn try_next(&mut self) -> Option<LoaderEvent> {
        let event = self.rx.try_recv().ok()?;
        self.note_finished(&event);
        Some(event)
    }

    /// Waits for the next finished operation.
    pub async fn next(&mut self) -> Option<LoaderEvent> {
        let event = self.rx.recv().await?;
        self.note_finished(&event);
        Some(event)
    }

    fn note_finished(&mut self, event: &LoaderEvent) {
        let LoaderEvent::Saved { coord, .. } = event else {
            return;
        };
        self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
        let Some(slot) = self.saves.get_mut(coord) else {
            return;
        };
        match slot.queued.take() {
            Some(next) => {
                slot.writing = next.clone();
                self.start_write(next);
            }
            None => {
                self.saves.remove(coord);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::storage::{MemoryStore, StoreFuture};
    use voxlink_voxel::{FlatGenerator, SnapshotCells};

    fn loader() -> ChunkLoader {
        loader_with(Arc::new(MemoryStore::new()))
    }

    fn loader_with(store: Arc<dyn KeyValueStore>) -> ChunkLoader {
        ChunkLoader::new(
            store,
            Arc::new(FlatGenerator::new(0, "stone#default", "stone#default")),
        )
    }

    fn filled(coord: ChunkCoord, key: &str) -> ChunkSnapshot {
        let mut snapshot = ChunkSnapshot::air(coord);
        snapshot.palette.push(key.into());
        snapshot.cells = SnapshotCells::Uniform(1);
        snapshot
    }

    /// Memory store whose first write stalls, so later writes would
    /// overtake it if nothing ordered them.
    struct StallingStore {
        inner: MemoryStore,
        stalled: AtomicBool,
    }

    impl StallingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                stalled: AtomicBool::new(false),
            }
        }
    }

    impl KeyValueStore for StallingStore {
        fn get<'a>(
            &'a self,
            collection: &'a str,
            key: &'a str,
        ) -> StoreFuture<'a, Option<Vec<u8>>> {
            self.inner.get(collection, key)
        }

        fn put<'a>(
            &'a self,
            collection: &'a str,
            key: &'a str,
            value: Vec<u8>,
        ) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                if !self.stalled.swap(true, Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                self.inner.put(collection, key, value).await
            })
        }

        fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, bool> {
            self.inner.delete(collection, key)
        }

        fn list_keys<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<String>> {
            self.inner.list_keys(collection)
        }
    }

    #[tokio::test]
    async fn test_missing_chunk_is_generated() {
        let mut loader = loader();
        let coord = ChunkCoord::new(0, -1, 0);
        assert!(loader.request(coord, Some(ConnectionId(1))));
        assert!(!loader.request(coord, Some(ConnectionId(2))));
        assert!(!loader.request(coord, Some(ConnectionId(1))));

        let Some(LoaderEvent::Loaded { coord: got, result }) = loader.next().await else {
            panic!("expected a load");
        };
        assert_eq!(got, coord);
        let (snapshot, source) = result.unwrap();
        assert_eq!(source, LoadSource::Generated);
        assert_eq!(snapshot.cells, SnapshotCells::Uniform(1));
        assert_eq!(loader.take_waiters(coord), vec![ConnectionId(1), ConnectionId(2)]);
        assert!(!loader.is_loading(coord));
    }

    #[tokio::test]
    async fn test_saved_chunk_loads_from_store() {
        let mut loader = loader();
        let coord = ChunkCoord::new(4, 0, 4);
        let mut saved = ChunkSnapshot::air(coord);
        saved.palette.push("glass#default".into());
        saved.cells = SnapshotCells::Uniform(1);
        loader.spawn_save(saved.clone());
        assert_eq!(loader.saves_in_flight(), 1);
        let Some(LoaderEvent::Saved { result, .. }) = loader.next().await else {
            panic!("expected a save");
        };
        result.unwrap();
        assert_eq!(loader.saves_in_flight(), 0);

        loader.request(coord, None);
        let Some(LoaderEvent::Loaded { result, .. }) = loader.next().await else {
            panic!("expected a load");
        };
        assert_eq!(result.unwrap(), (saved, LoadSource::Store));
    }

    #[tokio::test]
    async fn test_forget_requester() {
        let mut loader = loader();
        let coord = ChunkCoord::new(0, 0, 0);
        loader.request(coord, Some(ConnectionId(1)));
        loader.request(coord, Some(ConnectionId(2)));
        loader.forget_requester(ConnectionId(1));
        assert_eq!(loader.take_waiters(coord), vec![ConnectionId(2)]);
    }

    #[tokio::test]
    async fn test_later_save_of_same_chunk_wins() {
        let store = Arc::new(StallingStore::new());
        let mut loader = loader_with(store.clone());
        let coord = ChunkCoord::new(1, 0, 1);
        let older = filled(coord, "v1#default");
        let newer = filled(coord, "v2#default");

        loader.spawn_save(older);
        tokio::task::yield_now().await;
        loader.spawn_save(newer.clone());
        assert!(loader.is_saving(coord));
        assert_eq!(loader.saves_in_flight(), 2);

        for _ in 0..2 {
            let Some(LoaderEvent::Saved { result, .. }) = loader.next().await else {
                panic!("expected a save");
            };
            result.unwrap();
        }
        assert_eq!(loader.saves_in_flight(), 0);
        assert!(!loader.is_saving(coord));
        let stored = load_chunk(store.as_ref(), coord).await.unwrap();
        assert_eq!(stored, Some(newer));
    }

    #[tokio::test]
    async fn test_queued_saves_collapse_to_newest() {
        let store = Arc::new(StallingStore::new());
        let mut loader = loader_with(store.clone());
        let coord = ChunkCoord::new(0, 2, 0);
        loader.spawn_save(filled(coord, "a#default"));
        loader.spawn_save(filled(coord, "b#default"));
        loader.spawn_save(filled(coord, "c#default"));
        assert_eq!(loader.saves_in_flight(), 2);

        while loader.saves_in_flight() > 0 {
            loader.next().await.unwrap();
        }
        let stored = load_chunk(store.as_ref(), coord).await.unwrap();
        assert_eq!(stored, Some(filled(coord, "c#default")));
    }

    #[tokio::test]
    async fn test_load_during_save_sees_pending_snapshot() {
        let store = Arc::new(StallingStore::new());
        let mut loader = loader_with(store);
        let coord = ChunkCoord::new(3, 0, 3);
        let pending = filled(coord, "glass#default");
        loader.spawn_save(pending.clone());
        loader.request(coord, Some(ConnectionId(4)));

        let Some(LoaderEvent::Loaded { result, .. }) = loader.next().await else {
            panic!("expected the load before the stalled save");
        };
        assert_eq!(result.unwrap(), (pending, LoadSource::Store));
        assert_eq!(loader.take_waiters(coord), vec![ConnectionId(4)]);
    }
}
