//! Snapshot persister — trailing-debounced raster writes.
//!
//! DESIGN
//! ======
//! A single worker task owns the only pending deadline. Each stroke
//! notification moves the deadline to `stroke time + quiet interval`, so a
//! burst of strokes collapses into one write one quiet interval after the
//! last stroke, and a superseded deadline can never fire.
//!
//! The raster is encoded when the deadline fires, not when the stroke
//! lands, so the write carries everything drawn up to that moment. Writes
//! are awaited inside the worker, which keeps them in order.
//!
//! ERROR HANDLING
//! ==============
//! A failed write is logged and dropped. The next stroke schedules a fresh
//! write of the then-current raster, so drawing heals earlier failures. A
//! failure on the last write of a session loses that increment.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::SharedRaster;
use super::store::SnapshotStore;
use crate::config::PersistConfig;
use crate::ids::RoomId;

pub struct SnapshotPersister {
    strokes: Option<mpsc::UnboundedSender<Instant>>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotPersister {
    /// Start the debounce worker for `room_id`.
    #[must_use]
    pub fn spawn(room_id: RoomId, raster: SharedRaster, store: Arc<dyn SnapshotStore>, config: PersistConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        info!(%room_id, quiet_interval_ms = config.quiet_interval.as_millis(), "snapshot persister started");
        let worker = tokio::spawn(run_worker(room_id, raster, store, config.quiet_interval, rx));
        Self { strokes: Some(tx), worker: Some(worker) }
    }

    /// Note a completed stroke. Never blocks and never fails.
    pub fn stroke_completed(&self) {
        let Some(tx) = &self.strokes else {
            return;
        };
        if tx.send(Instant::now()).is_err() {
            debug!("snapshot persister stopped; stroke ignored");
        }
    }

    /// Stop accepting strokes, flush a pending write, and wait for the worker.
    pub async fn shutdown(mut self) {
        self.strokes.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "snapshot persister worker ended abnormally");
            }
        }
    }
}

impl Drop for SnapshotPersister {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker(
    room_id: RoomId,
    raster: SharedRaster,
    store: Arc<dyn SnapshotStore>,
    quiet_interval: Duration,
    mut strokes: mpsc::UnboundedReceiver<Instant>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            stroke = strokes.recv() => {
                if let Some(at) = stroke {
                    deadline = Some(at + quiet_interval);
                    continue;
                }
                if deadline.take().is_some() {
                    persist_once(&room_id, &raster, store.as_ref()).await;
                }
                break;
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                persist_once(&room_id, &raster, store.as_ref()).await;
            }
        }
    }

    debug!(%room_id, "snapshot persister stopped");
}

async fn persist_once(room_id: &RoomId, raster: &SharedRaster, store: &dyn SnapshotStore) {
    let encoded = raster.lock().unwrap_or_else(PoisonError::into_inner).encode();
    let image = match encoded {
        Ok(image) => image,
        Err(e) => {
            error!(%room_id, error = %e, "snapshot encode failed");
            return;
        }
    };

    match store.write_snapshot(room_id, &image).await {
        Ok(()) => debug!(%room_id, bytes = image.as_str().len(), "snapshot persisted"),
        Err(e) => error!(%room_id, error = %e, "snapshot write failed; next stroke will retry"),
    }
}

#[cfg(test)]
#[path = "persister_test.rs"]
mod tests;
