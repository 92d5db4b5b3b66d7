//! Presence broadcaster — local pointer moves to `cursor:moved` events.
//!
//! DESIGN
//! ======
//! The broadcaster owns the surface geometry, so normalization from page
//! coordinates to surface-local coordinates happens here, not in the
//! caller. Every precondition failure (no participant id, channel not
//! open, pointer outside the surface, throttled) is a silent skip: pointer
//! traffic must never produce a user-visible error.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::message::{CursorPosition, Position};
use crate::channel::{BroadcastChannel, CURSOR_EVENT};
use crate::ids::ParticipantId;

/// Surface rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceBounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SurfaceBounds {
    #[must_use]
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    /// Translate a page point into surface-local coordinates. `None` when
    /// the point lies outside the surface.
    #[must_use]
    pub fn localize(&self, client_x: f64, client_y: f64) -> Option<Position> {
        let x = client_x - self.left;
        let y = client_y - self.top;
        let inside = (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y);
        inside.then_some(Position { x, y })
    }
}

pub struct PresenceBroadcaster {
    channel: Arc<dyn BroadcastChannel>,
    participant: Option<ParticipantId>,
    bounds: SurfaceBounds,
    min_interval: Option<Duration>,
    last_sent: Option<Instant>,
}

impl PresenceBroadcaster {
    /// `participant` is `None` while the local user is unauthenticated.
    #[must_use]
    pub fn new(channel: Arc<dyn BroadcastChannel>, participant: Option<ParticipantId>, bounds: SurfaceBounds) -> Self {
        Self { channel, participant, bounds, min_interval: None, last_sent: None }
    }

    /// Publish at most once per `interval`. Moves inside the window are
    /// dropped, not deferred.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Option<Duration>) -> Self {
        self.min_interval = interval;
        self
    }

    /// Surface moved or resized.
    pub fn set_bounds(&mut self, bounds: SurfaceBounds) {
        self.bounds = bounds;
    }

    /// Local identity changed. `None` stops publishing.
    pub fn set_participant(&mut self, participant: Option<ParticipantId>) {
        self.participant = participant;
    }

    /// Handle one pointer-move event in page coordinates. Returns whether a
    /// message went out.
    pub fn pointer_moved(&mut self, client_x: f64, client_y: f64) -> bool {
        let Some(participant_id) = &self.participant else {
            return false;
        };
        if !self.channel.is_open() {
            return false;
        }
        let Some(position) = self.bounds.localize(client_x, client_y) else {
            return false;
        };

        let now = Instant::now();
        if let (Some(interval), Some(last)) = (self.min_interval, self.last_sent) {
            if now.duration_since(last) < interval {
                return false;
            }
        }

        let msg = CursorPosition::new(participant_id.clone(), position);
        match self.channel.publish(CURSOR_EVENT, msg.to_payload()) {
            Ok(()) => {
                self.last_sent = Some(now);
                true
            }
            Err(e) => {
                debug!(error = %e, "presence: cursor publish skipped");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "broadcaster_test.rs"]
mod tests;
