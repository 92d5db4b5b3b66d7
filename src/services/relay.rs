//! Change relay — store change feed to `snapshot:changed` room events.
//!
//! DESIGN
//! ======
//! One background task per process subscribes to the store's all-rooms
//! feed and broadcasts each committed write to that room's hub members.
//! The hub drops events for rooms with no members, so idle rooms cost
//! nothing beyond the feed itself.
//!
//! ERROR HANDLING
//! ==============
//! If the feed cannot be established, or ends, the task logs and
//! re-subscribes after a delay. Changes committed while it is down are not
//! replayed; clients catch up on their next room entry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::SNAPSHOT_CHANGED_EVENT;
use crate::channel::hub::RoomHub;
use crate::frame::{Data, Frame};
use crate::snapshot::store::{SnapshotChange, SnapshotStore};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Spawn the change relay. Returns a handle for shutdown.
pub fn spawn_change_relay(hub: RoomHub, store: Arc<dyn SnapshotStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match store.subscribe_all().await {
                Ok(mut changes) => {
                    info!("change relay subscribed");
                    while let Some(change) = changes.recv().await {
                        relay_change(&hub, &change);
                    }
                    warn!("change relay feed ended; re-subscribing");
                }
                Err(e) => error!(error = %e, "change relay subscribe failed"),
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    })
}

/// Broadcast one committed write to its room. Returns how many members it
/// reached.
pub fn relay_change(hub: &RoomHub, change: &SnapshotChange) -> usize {
    let frame = Frame::request(SNAPSHOT_CHANGED_EVENT, change_payload(change)).with_room_id(change.room_id.clone());
    let delivered = hub.broadcast(&change.room_id, &frame, None);
    debug!(room_id = %change.room_id, delivered, "snapshot change relayed");
    delivered
}

fn change_payload(change: &SnapshotChange) -> Data {
    let mut data = Data::new();
    data.insert("roomId".into(), json!(change.room_id));
    data.insert("imageData".into(), json!(change.image_data));
    data
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
