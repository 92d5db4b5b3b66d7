use super::*;
use crate::presence::Position;
use crate::snapshot::raster::{ImageData, RasterBuffer, Rgba, Stroke};
use crate::snapshot::store::{SnapshotChange, StoreError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::sleep;

const QUIET: Duration = Duration::from_secs(1);

// =============================================================================
// RECORDING STORE
// =============================================================================

#[derive(Default)]
struct RecordingStore {
    attempts: Mutex<Vec<(Instant, ImageData)>>,
    failures_left: AtomicUsize,
}

impl RecordingStore {
    fn failing_first(n: usize) -> Arc<Self> {
        let store = Self::default();
        store.failures_left.store(n, Ordering::SeqCst);
        Arc::new(store)
    }

    fn attempts(&self) -> Vec<(Instant, ImageData)> {
        self.attempts.lock().expect("attempts mutex").clone()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for RecordingStore {
    async fn write_snapshot(&self, _room_id: &RoomId, image: &ImageData) -> Result<(), StoreError> {
        self.attempts
            .lock()
            .expect("attempts mutex")
            .push((Instant::now(), image.clone()));
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn read_latest(&self, _room_id: &RoomId) -> Result<Option<ImageData>, StoreError> {
        Ok(None)
    }

    async fn subscribe_all(&self) -> Result<mpsc::Receiver<SnapshotChange>, StoreError> {
        Ok(mpsc::channel(1).1)
    }
}

fn raster() -> SharedRaster {
    Arc::new(Mutex::new(RasterBuffer::blank(8, 8)))
}

fn spawn(store: &Arc<RecordingStore>, raster: &SharedRaster) -> SnapshotPersister {
    SnapshotPersister::spawn(
        RoomId::from("room-1"),
        raster.clone(),
        store.clone(),
        PersistConfig { quiet_interval: QUIET },
    )
}

// =============================================================================
// DEBOUNCE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn burst_of_strokes_yields_one_write_after_the_last() {
    let store = Arc::new(RecordingStore::default());
    let persister = spawn(&store, &raster());
    let start = Instant::now();

    for _ in 0..5 {
        persister.stroke_completed();
        sleep(Duration::from_millis(200)).await;
    }
    // Last stroke landed at start + 800ms.
    sleep(Duration::from_millis(500)).await;
    assert!(store.attempts().is_empty(), "no write inside the quiet interval");

    sleep(Duration::from_secs(2)).await;
    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].0, start + Duration::from_millis(800) + QUIET);
}

#[tokio::test(start_paused = true)]
async fn spaced_strokes_each_get_a_write() {
    let store = Arc::new(RecordingStore::default());
    let persister = spawn(&store, &raster());

    for _ in 0..3 {
        persister.stroke_completed();
        sleep(Duration::from_millis(1500)).await;
    }
    assert_eq!(store.attempts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn write_carries_raster_state_at_fire_time() {
    let store = Arc::new(RecordingStore::default());
    let raster = raster();
    let persister = spawn(&store, &raster);

    persister.stroke_completed();
    sleep(Duration::from_millis(300)).await;
    raster
        .lock()
        .expect("raster mutex")
        .draw_stroke(&Stroke { points: vec![Position::new(4.0, 4.0)], color: Rgba::BLACK, width: 2.0 });
    sleep(Duration::from_secs(2)).await;

    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    let written = RasterBuffer::decode(&attempts[0].1).expect("decode written snapshot");
    assert_eq!(written.pixel(4, 4), Some(Rgba::BLACK));
}

// =============================================================================
// FAILURES + LIFECYCLE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn failed_write_is_not_retried_until_next_stroke() {
    let store = RecordingStore::failing_first(1);
    let persister = spawn(&store, &raster());

    persister.stroke_completed();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.attempts().len(), 1, "failure is not retried on its own");

    persister.stroke_completed();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(store.attempts().len(), 2, "next stroke writes again");
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_a_pending_write_once() {
    let store = Arc::new(RecordingStore::default());
    let persister = spawn(&store, &raster());
    let start = Instant::now();

    persister.stroke_completed();
    persister.shutdown().await;

    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].0 < start + QUIET, "flush does not wait for the quiet interval");

    sleep(Duration::from_secs(3)).await;
    assert_eq!(store.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_without_pending_stroke_writes_nothing() {
    let store = Arc::new(RecordingStore::default());
    let persister = spawn(&store, &raster());

    persister.shutdown().await;
    assert!(store.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_persister_cancels_the_pending_write() {
    let store = Arc::new(RecordingStore::default());
    let persister = spawn(&store, &raster());

    persister.stroke_completed();
    drop(persister);
    sleep(Duration::from_secs(3)).await;
    assert!(store.attempts().is_empty());
}
