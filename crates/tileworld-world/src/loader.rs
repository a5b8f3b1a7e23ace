//! Background chunk preloading around a moving viewer.
//!
//! [`ChunkPreloader::update`] is called from the viewer's update loop and
//! never blocks on I/O or generation: loads run on a small pool of worker
//! threads fed through a bounded channel, and finished coordinates are
//! collected with [`ChunkPreloader::drain_completed`].

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tileworld_common::{ChunkCoord, TileCoord, WorldResult, TILE_SIZE};
use tracing::{debug, trace, warn};

use crate::chunk_store::ChunkStore;

/// Somewhere chunks can be made resident.
pub trait ChunkSource: Send + Sync + 'static {
    /// Whether the chunk is already available.
    fn is_resident(&self, coord: ChunkCoord) -> bool;

    /// Makes the chunk available. May block.
    fn load(&self, coord: ChunkCoord) -> WorldResult<()>;
}

impl ChunkSource for ChunkStore {
    fn is_resident(&self, coord: ChunkCoord) -> bool {
        self.is_loaded(coord)
    }

    fn load(&self, coord: ChunkCoord) -> WorldResult<()> {
        self.get_chunk(coord).map(|_| ())
    }
}

/// Preloader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Chunks loaded around the viewer, in chunks (square radius).
    pub preload_radius: u32,
    /// Chunks reported as visible, in chunks.
    pub visible_radius: u32,
    /// Distance the viewer must move before another preload pass, in world units.
    pub hysteresis: f64,
    /// Worker thread count.
    pub workers: usize,
    /// Side of one tile in world units.
    pub tile_size: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            preload_radius: 3,
            visible_radius: 2,
            hysteresis: 128.0,
            workers: 4,
            tile_size: TILE_SIZE,
        }
    }
}

/// Chunks that entered or left the visible square during an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityChange {
    /// Newly visible chunks.
    pub entered: Vec<ChunkCoord>,
    /// Chunks no longer visible.
    pub left: Vec<ChunkCoord>,
}

impl VisibilityChange {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

type LoadResult = (ChunkCoord, WorldResult<()>);

/// Keeps chunks around a moving point resident.
pub struct ChunkPreloader<S: ChunkSource> {
    config: LoaderConfig,
    source: Arc<S>,
    jobs: Option<Sender<ChunkCoord>>,
    done: Receiver<LoadResult>,
    in_flight: Arc<Mutex<HashSet<ChunkCoord>>>,
    workers: Vec<JoinHandle<()>>,
    last_pass: Option<(f64, f64)>,
    retry: bool,
    visible: HashSet<ChunkCoord>,
}

impl<S: ChunkSource> ChunkPreloader<S> {
    /// Starts the worker pool.
    pub fn new(source: Arc<S>, config: LoaderConfig) -> std::io::Result<Self> {
        let side = 2 * config.preload_radius as usize + 1;
        let (job_tx, job_rx) = bounded::<ChunkCoord>(2 * side * side);
        let (done_tx, done_rx) = unbounded::<LoadResult>();
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let source = Arc::clone(&source);
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("chunk-loader-{index}"))
                .spawn(move || worker_loop(&*source, &jobs, &done, &in_flight))?;
            workers.push(handle);
        }

        Ok(Self {
            config,
            source,
            jobs: Some(job_tx),
            done: done_rx,
            in_flight,
            workers,
            last_pass: None,
            retry: false,
            visible: HashSet::new(),
        })
    }

    /// Starts a preloader with default settings.
    pub fn with_defaults(source: Arc<S>) -> std::io::Result<Self> {
        Self::new(source, LoaderConfig::default())
    }

    /// Feeds the viewer position in world units.
    ///
    /// Schedules missing chunks when the viewer has moved past the hysteresis
    /// distance (or on the first call) and reports visibility changes.
    pub fn update(&mut self, x: f64, y: f64) -> VisibilityChange {
        let tile = TileCoord::new(
            (x / self.config.tile_size).floor() as i32,
            (y / self.config.tile_size).floor() as i32,
        );
        let centre = tile.to_chunk_coord();

        let moved_far = self.last_pass.map_or(true, |(lx, ly)| {
            let (dx, dy) = (x - lx, y - ly);
            (dx * dx + dy * dy).sqrt() > self.config.hysteresis
        });
        if moved_far || self.retry {
            self.last_pass = Some((x, y));
            self.schedule_around(centre);
        }

        self.update_visible(centre)
    }

    fn schedule_around(&mut self, centre: ChunkCoord) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        self.retry = false;

        let mut scheduled = 0;
        for coord in centre.square_around(self.config.preload_radius) {
            if self.source.is_resident(coord) {
                continue;
            }
            if !self.in_flight.lock().insert(coord) {
                continue;
            }
            match jobs.try_send(coord) {
                Ok(()) => scheduled += 1,
                Err(TrySendError::Full(coord) | TrySendError::Disconnected(coord)) => {
                    self.in_flight.lock().remove(&coord);
                    self.retry = true;
                },
            }
        }

        if scheduled > 0 {
            debug!("Scheduled {} chunk loads around {}", scheduled, centre);
        }
    }

    fn update_visible(&mut self, centre: ChunkCoord) -> VisibilityChange {
        let now: HashSet<ChunkCoord> = centre
            .square_around(self.config.visible_radius)
            .into_iter()
            .collect();

        let mut change = VisibilityChange {
            entered: now.difference(&self.visible).copied().collect(),
            left: self.visible.difference(&now).copied().collect(),
        };
        change.entered.sort_by_key(|c| c.chebyshev_distance(centre));
        change.left.sort();

        self.visible = now;
        change
    }

    /// Coordinates whose load finished since the last call. Failures are logged.
    pub fn drain_completed(&self) -> Vec<ChunkCoord> {
        self.done
            .try_iter()
            .filter_map(|(coord, result)| match result {
                Ok(()) => Some(coord),
                Err(e) => {
                    warn!("Failed to load chunk {}: {}", coord, e);
                    None
                },
            })
            .collect()
    }

    /// Number of chunks scheduled but not finished.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Whether a chunk is currently scheduled.
    #[must_use]
    pub fn is_in_flight(&self, coord: ChunkCoord) -> bool {
        self.in_flight.lock().contains(&coord)
    }

    /// Currently visible chunks.
    #[must_use]
    pub fn visible(&self) -> &HashSet<ChunkCoord> {
        &self.visible
    }

    /// The chunk source.
    #[must_use]
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Loader settings.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

impl<S: ChunkSource> Drop for ChunkPreloader<S> {
    fn drop(&mut self) {
        // Closing the job channel ends every worker loop.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Chunk loader worker panicked");
            }
        }
    }
}

fn worker_loop<S: ChunkSource + ?Sized>(
    source: &S,
    jobs: &Receiver<ChunkCoord>,
    done: &Sender<LoadResult>,
    in_flight: &Mutex<HashSet<ChunkCoord>>,
) {
    for coord in jobs {
        trace!("Loading chunk {}", coord);
        let result = source.load(coord);
        in_flight.lock().remove(&coord);
        if done.send((coord, result)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::WorldGenerator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_first_update_loads_preload_square() {
        let store = Arc::new(ChunkStore::new(WorldGenerator::with_seed(1), None));
        let mut loader = ChunkPreloader::with_defaults(Arc::clone(&store)).expect("spawn failed");

        let change = loader.update(0.0, 0.0);
        assert_eq!(change.entered.len(), 25);
        assert_eq!(change.entered[0], ChunkCoord::new(0, 0));
        assert!(change.left.is_empty());

        wait_until(|| store.loaded_count() == 49);
        wait_until(|| loader.in_flight_count() == 0);
        let mut completed = Vec::new();
        wait_until(|| {
            completed.extend(loader.drain_completed());
            completed.len() == 49
        });
    }

    #[test]
    fn test_small_moves_do_not_reschedule() {
        let store = Arc::new(ChunkStore::new(WorldGenerator::with_seed(2), None));
        let mut loader = ChunkPreloader::with_defaults(Arc::clone(&store)).expect("spawn failed");

        loader.update(0.0, 0.0);
        wait_until(|| store.loaded_count() == 49 && loader.in_flight_count() == 0);

        // 100 units is inside the hysteresis and inside the same chunk.
        let change = loader.update(100.0, 0.0);
        assert!(change.is_empty());
        assert_eq!(loader.in_flight_count(), 0);
        assert_eq!(store.loaded_count(), 49);
    }

    #[test]
    fn test_crossing_chunks_reports_visibility() {
        let store = Arc::new(ChunkStore::new(WorldGenerator::with_seed(3), None));
        let mut loader = ChunkPreloader::with_defaults(Arc::clone(&store)).expect("spawn failed");
        loader.update(0.0, 0.0);

        // One chunk to the east: 16 tiles * 32 units.
        let change = loader.update(512.0, 0.0);
        assert_eq!(change.entered.len(), 5);
        assert_eq!(change.left.len(), 5);
        assert!(change.entered.iter().all(|c| c.x == 3));
        assert!(change.left.iter().all(|c| c.x == -2));

        wait_until(|| (-2..=4).all(|x| store.is_loaded(ChunkCoord::new(x, 3))));
    }

    struct CountingSource {
        loads: AtomicUsize,
        resident: Mutex<HashSet<ChunkCoord>>,
    }

    impl ChunkSource for CountingSource {
        fn is_resident(&self, coord: ChunkCoord) -> bool {
            self.resident.lock().contains(&coord)
        }

        fn load(&self, coord: ChunkCoord) -> WorldResult<()> {
            thread::sleep(Duration::from_millis(20));
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.resident.lock().insert(coord);
            Ok(())
        }
    }

    #[test]
    fn test_in_flight_chunks_not_rescheduled() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            resident: Mutex::new(HashSet::new()),
        });
        let config = LoaderConfig {
            preload_radius: 1,
            hysteresis: 1.0,
            workers: 1,
            ..Default::default()
        };
        let mut loader = ChunkPreloader::new(Arc::clone(&source), config).expect("spawn failed");

        loader.update(0.0, 0.0);
        // Moves past the hysteresis while loads are still running.
        loader.update(2.0, 0.0);
        loader.update(4.0, 0.0);

        wait_until(|| source.loads.load(Ordering::SeqCst) == 9 && loader.in_flight_count() == 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(source.loads.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_failed_loads_are_not_reported() {
        let store = Arc::new(ChunkStore::mirror(None));
        let mut loader = ChunkPreloader::with_defaults(Arc::clone(&store)).expect("spawn failed");
        loader.update(0.0, 0.0);
        wait_until(|| loader.in_flight_count() == 0);
        thread::sleep(Duration::from_millis(20));
        assert!(loader.drain_completed().is_empty());
    }

    #[test]
    fn test_drop_joins_workers() {
        let store = Arc::new(ChunkStore::new(WorldGenerator::with_seed(4), None));
        let mut loader = ChunkPreloader::with_defaults(Arc::clone(&store)).expect("spawn failed");
        loader.update(0.0, 0.0);
        drop(loader);
        assert_eq!(Arc::strong_count(&store), 1);
    }
}
