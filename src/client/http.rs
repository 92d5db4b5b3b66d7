//! HTTP snapshot store — [`SnapshotStore`] over a server's snapshot routes.
//!
//! Reads and writes go through `GET`/`PUT /api/rooms/{id}/snapshot`. The
//! change feed is the room channel's `snapshot:changed` events, so it only
//! covers rooms that channel has joined.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{BroadcastChannel, SNAPSHOT_CHANGED_EVENT};
use crate::frame::Frame;
use crate::ids::RoomId;
use crate::routes::rooms::SnapshotBody;
use crate::snapshot::raster::ImageData;
use crate::snapshot::store::{SnapshotChange, SnapshotStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CHANGE_FEED_CAPACITY: usize = 64;

pub struct HttpSnapshotStore {
    client: reqwest::Client,
    base_url: String,
    changes: Arc<dyn BroadcastChannel>,
}

impl HttpSnapshotStore {
    /// `base_url` is the server origin; `changes` is a channel joined to
    /// the room(s) whose change feed is wanted.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, changes: Arc<dyn BroadcastChannel>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned(), changes })
    }

    fn snapshot_url(&self, room_id: &RoomId) -> String {
        format!("{}/api/rooms/{}/snapshot", self.base_url, room_id)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for HttpSnapshotStore {
    async fn write_snapshot(&self, room_id: &RoomId, image: &ImageData) -> Result<(), StoreError> {
        self.client
            .put(self.snapshot_url(room_id))
            .json(&SnapshotBody { image_data: image.clone() })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_latest(&self, room_id: &RoomId) -> Result<Option<ImageData>, StoreError> {
        let response = self.client.get(self.snapshot_url(room_id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json::<SnapshotBody>().await?;
        Ok(Some(body.image_data))
    }

    async fn subscribe_all(&self) -> Result<mpsc::Receiver<SnapshotChange>, StoreError> {
        let mut frames = self.changes.subscribe(SNAPSHOT_CHANGED_EVENT)?;
        let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    frame = frames.recv() => {
                        let Some(frame) = frame else { break };
                        let Some(change) = change_from_frame(&frame) else {
                            debug!(id = %frame.id, "http store: ignoring malformed snapshot change");
                            continue;
                        };
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// `snapshot:changed` payload → change. Falls back to the frame's room id.
fn change_from_frame(frame: &Frame) -> Option<SnapshotChange> {
    let image_data = frame
        .data
        .get("imageData")
        .and_then(|v| serde_json::from_value::<ImageData>(v.clone()).ok())?;
    let room_id = frame
        .data
        .get("roomId")
        .and_then(serde_json::Value::as_str)
        .map(RoomId::from)
        .or_else(|| frame.room_id.clone())?;
    Some(SnapshotChange { room_id, image_data })
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
