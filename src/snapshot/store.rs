//! Snapshot store — durable latest-snapshot-per-room plus a change feed.
//!
//! DESIGN
//! ======
//! One row per room, overwritten on every write; history is not kept. The
//! change feed pushes the full image to subscribers after each committed
//! write, from any writer.
//!
//! Postgres: writes upsert `room_snapshots` and `pg_notify` the room id in
//! the same transaction. Listeners re-read the row on notification, since
//! NOTIFY payloads are too small to carry an image.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use super::raster::ImageData;
use crate::ids::RoomId;

/// Postgres NOTIFY channel for committed snapshot writes.
pub const SNAPSHOT_NOTIFY_CHANNEL: &str = "room_snapshots";

const CHANGE_FEED_CAPACITY: usize = 64;
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotChange {
    pub room_id: RoomId,
    pub image_data: ImageData,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Channel(#[from] crate::channel::ChannelError),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::Http(_) => "E_STORE_HTTP",
            Self::Channel(e) => crate::frame::ErrorCode::error_code(e),
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the room's snapshot and notify change-feed subscribers.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write does not commit.
    async fn write_snapshot(&self, room_id: &RoomId, image: &ImageData) -> Result<(), StoreError>;

    /// Most recently committed snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    async fn read_latest(&self, room_id: &RoomId) -> Result<Option<ImageData>, StoreError>;

    /// Change feed for every room.
    ///
    /// # Errors
    ///
    /// Returns a store error if the feed cannot be established.
    async fn subscribe_all(&self) -> Result<mpsc::Receiver<SnapshotChange>, StoreError>;

    /// Change feed for one room.
    ///
    /// # Errors
    ///
    /// Returns a store error if the feed cannot be established.
    async fn subscribe_changes(&self, room_id: &RoomId) -> Result<mpsc::Receiver<SnapshotChange>, StoreError> {
        let mut all = self.subscribe_all().await?;
        let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        let room_id = room_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    change = all.recv() => {
                        let Some(change) = change else { break };
                        if change.room_id == room_id && tx.send(change).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local store. Used by tests and single-process embedders.
pub struct MemorySnapshotStore {
    rows: Mutex<HashMap<RoomId, ImageData>>,
    changes: broadcast::Sender<SnapshotChange>,
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { rows: Mutex::new(HashMap::new()), changes }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn write_snapshot(&self, room_id: &RoomId, image: &ImageData) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id.clone(), image.clone());
        // No subscribers is not an error.
        let _ = self
            .changes
            .send(SnapshotChange { room_id: room_id.clone(), image_data: image.clone() });
        Ok(())
    }

    async fn read_latest(&self, room_id: &RoomId) -> Result<Option<ImageData>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned())
    }

    async fn subscribe_all(&self) -> Result<mpsc::Receiver<SnapshotChange>, StoreError> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    change = changes.recv() => match change {
                        Ok(change) => {
                            if tx.send(change).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "snapshot feed lagged; older changes dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Ok(rx)
    }
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn write_snapshot(&self, room_id: &RoomId, image: &ImageData) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO room_snapshots (room_id, image_data, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (room_id) DO UPDATE
             SET image_data = EXCLUDED.image_data, updated_at = EXCLUDED.updated_at",
        )
        .bind(room_id.as_str())
        .bind(image.as_str())
        .execute(tx.as_mut())
        .await?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(SNAPSHOT_NOTIFY_CHANNEL)
            .bind(room_id.as_str())
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_latest(&self, room_id: &RoomId) -> Result<Option<ImageData>, StoreError> {
        let row: Option<String> = sqlx::query_scalar("SELECT image_data FROM room_snapshots WHERE room_id = $1")
            .bind(room_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ImageData::new))
    }

    async fn subscribe_all(&self) -> Result<mpsc::Receiver<SnapshotChange>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(SNAPSHOT_NOTIFY_CHANNEL).await?;
        info!(channel = SNAPSHOT_NOTIFY_CHANNEL, "snapshot change feed listening");

        let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let store = PgSnapshotStore::new(pool);
            loop {
                let notification = tokio::select! {
                    () = tx.closed() => break,
                    notification = listener.recv() => notification,
                };
                let room_id = match notification {
                    Ok(n) => RoomId::from(n.payload()),
                    Err(e) => {
                        error!(error = %e, "snapshot change feed receive failed");
                        tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                        continue;
                    }
                };
                match store.read_latest(&room_id).await {
                    Ok(Some(image_data)) => {
                        if tx.send(SnapshotChange { room_id, image_data }).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%room_id, error = %e, "snapshot change feed read failed"),
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
