//! Snapshot sync — seed the local raster on room entry, then follow the feed.
//!
//! CONSISTENCY
//! ===========
//! Last write wins. Every pushed snapshot replaces the whole local raster,
//! including echoes of this client's own writes, so strokes drawn between
//! a write and its echo are overwritten by the echo.

use std::sync::PoisonError;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SharedRaster;
use super::raster::{RasterBuffer, RasterError};
use super::store::{SnapshotChange, SnapshotStore};
use crate::ids::RoomId;

/// Build the initial raster for a room: the latest persisted snapshot, or a
/// blank surface when there is none or it cannot be read.
pub async fn seed_raster(store: &dyn SnapshotStore, room_id: &RoomId, width: u32, height: u32) -> RasterBuffer {
    let mut raster = RasterBuffer::blank(width, height);
    match store.read_latest(room_id).await {
        Ok(Some(image)) => match RasterBuffer::decode(&image) {
            Ok(snapshot) => {
                raster.replace_with(&snapshot);
                info!(%room_id, "raster seeded from snapshot");
            }
            Err(e) => warn!(%room_id, error = %e, "stored snapshot undecodable; starting blank"),
        },
        Ok(None) => debug!(%room_id, "no stored snapshot; starting blank"),
        Err(e) => warn!(%room_id, error = %e, "snapshot read failed; starting blank"),
    }
    raster
}

/// Replace the shared raster with a pushed snapshot.
///
/// # Errors
///
/// Returns a [`RasterError`] if the pushed image cannot be decoded; the
/// raster is left untouched in that case.
pub fn apply_change(raster: &SharedRaster, change: &SnapshotChange) -> Result<(), RasterError> {
    let snapshot = RasterBuffer::decode(&change.image_data)?;
    raster
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace_with(&snapshot);
    Ok(())
}

/// Apply every change from `changes` until the feed closes.
#[must_use]
pub fn spawn_follower(raster: SharedRaster, mut changes: mpsc::Receiver<SnapshotChange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            match apply_change(&raster, &change) {
                Ok(()) => debug!(room_id = %change.room_id, "raster replaced from change feed"),
                Err(e) => warn!(room_id = %change.room_id, error = %e, "ignoring undecodable snapshot change"),
            }
        }
    })
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
