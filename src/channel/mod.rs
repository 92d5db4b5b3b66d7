//! Broadcast channel — per-room publish/subscribe seam.
//!
//! DESIGN
//! ======
//! Presence code talks to a room only through [`BroadcastChannel`]. The
//! contract is deliberately weak: delivery is at-most-once, there is no
//! ordering across publishers, nothing is persisted, and a publisher never
//! receives its own events. [`hub::RoomHub`] is the in-process transport
//! behind the websocket endpoint and the tests.

pub mod hub;

use tokio::sync::mpsc;

use crate::frame::{Data, Frame};

/// Event name for cursor position messages.
pub const CURSOR_EVENT: &str = "cursor:moved";

/// Event name for committed snapshot notifications.
pub const SNAPSHOT_CHANGED_EVENT: &str = "snapshot:changed";

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
}

impl crate::frame::ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "E_CHANNEL_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// A handle on one room's broadcast channel, held by one participant.
pub trait BroadcastChannel: Send + Sync {
    /// Whether the handle is currently joined and able to publish.
    fn is_open(&self) -> bool;

    /// Fan `payload` out to every other subscriber of `event`. Never waits
    /// for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the handle has left the room.
    fn publish(&self, event: &str, payload: Data) -> Result<(), ChannelError>;

    /// Receive every `event` published by other room members from now on.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the handle has left the room.
    fn subscribe(&self, event: &str) -> Result<mpsc::Receiver<Frame>, ChannelError>;

    /// Leave the room. Open subscriptions end and later publishes fail.
    fn close(&self);
}
