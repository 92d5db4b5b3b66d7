//! Room hub — in-process fan-out for room events.
//!
//! DESIGN
//! ======
//! Each room keeps a list of subscribers (`client_id`, event, bounded
//! sender). Publishing walks the list under a short synchronous lock and
//! uses `try_send`, so a slow subscriber loses events instead of stalling
//! the publisher. Dead subscribers are pruned lazily on the next publish.
//!
//! LIFECYCLE
//! =========
//! `join` hands out a [`RoomChannel`]. Closing or dropping that handle
//! removes its subscriptions; the room entry is evicted with its last member.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BroadcastChannel, ChannelError};
use crate::frame::{Data, Frame};
use crate::ids::RoomId;

// =============================================================================
// STATE
// =============================================================================

struct Subscriber {
    client_id: Uuid,
    event: String,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct RoomState {
    members: HashSet<Uuid>,
    subscribers: Vec<Subscriber>,
}

/// Shared registry of live rooms. Cheap to clone.
#[derive(Clone)]
pub struct RoomHub {
    rooms: Arc<Mutex<HashMap<RoomId, RoomState>>>,
    capacity: usize,
}

impl RoomHub {
    /// `capacity` bounds each subscriber's queue.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { rooms: Arc::new(Mutex::new(HashMap::new())), capacity: capacity.max(1) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, RoomState>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join `room_id` as a fresh member.
    #[must_use]
    pub fn join(&self, room_id: RoomId) -> RoomChannel {
        let client_id = Uuid::new_v4();
        let members = {
            let mut rooms = self.lock();
            let room = rooms.entry(room_id.clone()).or_default();
            room.members.insert(client_id);
            room.members.len()
        };
        info!(%room_id, %client_id, members, "hub: member joined");
        RoomChannel { hub: self.clone(), room_id, client_id, open: AtomicBool::new(true) }
    }

    /// Deliver `frame` to every subscriber of its syscall in `room_id`,
    /// skipping `exclude`. Returns the number of queues that accepted it.
    pub fn broadcast(&self, room_id: &RoomId, frame: &Frame, exclude: Option<Uuid>) -> usize {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        room.subscribers.retain(|sub| {
            if sub.event != frame.syscall || Some(sub.client_id) == exclude {
                return true;
            }
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%room_id, client_id = %sub.client_id, syscall = %frame.syscall, "hub: subscriber queue full; dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%room_id, client_id = %sub.client_id, "hub: pruning closed subscriber");
                    false
                }
            }
        });
        delivered
    }

    /// Number of members currently joined to `room_id`.
    #[must_use]
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.lock().get(room_id).map_or(0, |room| room.members.len())
    }

    fn subscribe(&self, room_id: &RoomId, client_id: Uuid, event: &str) -> Result<mpsc::Receiver<Frame>, ChannelError> {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return Err(ChannelError::Closed);
        };
        if !room.members.contains(&client_id) {
            return Err(ChannelError::Closed);
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        room.subscribers.push(Subscriber { client_id, event: event.to_owned(), tx });
        Ok(rx)
    }

    fn part(&self, room_id: &RoomId, client_id: Uuid) {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        room.members.remove(&client_id);
        room.subscribers.retain(|sub| sub.client_id != client_id);
        let remaining = room.members.len();
        if remaining == 0 {
            rooms.remove(room_id);
        }
        drop(rooms);
        info!(%room_id, %client_id, remaining, "hub: member parted");
    }
}

// =============================================================================
// ROOM CHANNEL
// =============================================================================

/// One member's handle on a hub room.
pub struct RoomChannel {
    hub: RoomHub,
    room_id: RoomId,
    client_id: Uuid,
    open: AtomicBool,
}

impl RoomChannel {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Hub-assigned member id, used as `from` on published frames.
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Leave the room. Subscriptions end and later publishes fail.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.hub.part(&self.room_id, self.client_id);
        }
    }
}

impl BroadcastChannel for RoomChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn publish(&self, event: &str, payload: Data) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let frame = Frame::request(event, payload)
            .with_room_id(self.room_id.clone())
            .with_from(self.client_id.to_string());
        self.hub.broadcast(&self.room_id, &frame, Some(self.client_id));
        Ok(())
    }

    fn subscribe(&self, event: &str) -> Result<mpsc::Receiver<Frame>, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        self.hub.subscribe(&self.room_id, self.client_id, event)
    }

    fn close(&self) {
        RoomChannel::close(self);
    }
}

impl Drop for RoomChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
