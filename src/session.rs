//! Room session — one participant's live view of one room.
//!
//! DESIGN
//! ======
//! A session wires the presence and snapshot halves together:
//! - the raster is seeded from the latest snapshot, then follows the
//!   store's change feed (last write wins)
//! - local strokes draw into the raster and poke the debounced persister
//! - the renderer runs on its own task, fed by the room's `cursor:moved`
//!   subscription
//! - local pointer moves go out through the broadcaster
//!
//! LIFECYCLE
//! =========
//! `leave()` tears down in a fixed order: stop following the feed, flush
//! and join the persister, close the channel (which ends the renderer's
//! subscription), then remove every marker and return the surface.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::info;

use crate::channel::{BroadcastChannel, CURSOR_EVENT, ChannelError};
use crate::config::{PersistConfig, PresenceConfig};
use crate::ids::{ParticipantId, RoomId};
use crate::presence::{MarkerSurface, PresenceBroadcaster, PresenceRenderer, SurfaceBounds};
use crate::profile::ProfileLookup;
use crate::snapshot::raster::{MAX_RASTER_DIM, Stroke};
use crate::snapshot::store::{SnapshotStore, StoreError};
use crate::snapshot::{SharedRaster, SnapshotPersister, sync};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("presence renderer task failed: {0}")]
    Renderer(#[from] tokio::task::JoinError),
}

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionContext {
    pub room_id: RoomId,
    /// `None` while the local user is unauthenticated; presence is then
    /// receive-only.
    pub participant: Option<ParticipantId>,
    pub channel: Arc<dyn BroadcastChannel>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub store: Arc<dyn SnapshotStore>,
}

pub struct RoomSession<S: MarkerSurface> {
    room_id: RoomId,
    channel: Arc<dyn BroadcastChannel>,
    raster: SharedRaster,
    broadcaster: PresenceBroadcaster,
    persister: SnapshotPersister,
    follower: JoinHandle<()>,
    renderer: JoinHandle<PresenceRenderer<S>>,
}

impl<S> RoomSession<S>
where
    S: MarkerSurface + Send + 'static,
    S::Marker: Send,
{
    /// Enter `ctx.room_id`: seed the raster sized to `bounds`, follow the
    /// change feed, and start rendering remote cursors onto `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor subscription or the change feed
    /// cannot be established.
    pub async fn enter(
        ctx: SessionContext,
        surface: S,
        bounds: SurfaceBounds,
        presence: &PresenceConfig,
        persist: PersistConfig,
    ) -> Result<Self, SessionError> {
        let SessionContext { room_id, participant, channel, profiles, store } = ctx;

        let cursor_rx = channel.subscribe(CURSOR_EVENT)?;
        let changes = store.subscribe_changes(&room_id).await?;

        let (width, height) = raster_size(bounds);
        let raster: SharedRaster = Arc::new(Mutex::new(sync::seed_raster(store.as_ref(), &room_id, width, height).await));
        let follower = sync::spawn_follower(raster.clone(), changes);
        let persister = SnapshotPersister::spawn(room_id.clone(), raster.clone(), store, persist);

        let renderer = PresenceRenderer::new(surface, profiles, presence);
        let renderer = tokio::spawn(renderer.run(cursor_rx));

        let broadcaster = PresenceBroadcaster::new(channel.clone(), participant.clone(), bounds)
            .with_min_interval(presence.min_publish_interval);

        info!(%room_id, participant = ?participant, width, height, "session: entered room");
        Ok(Self { room_id, channel, raster, broadcaster, persister, follower, renderer })
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The room's local raster.
    #[must_use]
    pub fn raster(&self) -> &SharedRaster {
        &self.raster
    }

    /// Forward a local pointer move. Returns whether a cursor event went out.
    pub fn pointer_moved(&mut self, client_x: f64, client_y: f64) -> bool {
        self.broadcaster.pointer_moved(client_x, client_y)
    }

    /// Sign in or out mid-session. Rendering is unaffected; publishing
    /// needs a participant.
    pub fn set_participant(&mut self, participant: Option<ParticipantId>) {
        self.broadcaster.set_participant(participant);
    }

    /// Surface moved or resized. The raster keeps its size.
    pub fn set_bounds(&mut self, bounds: SurfaceBounds) {
        self.broadcaster.set_bounds(bounds);
    }

    /// Draw a completed stroke and schedule a snapshot write.
    pub fn stroke(&self, stroke: &Stroke) {
        self.raster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .draw_stroke(stroke);
        self.persister.stroke_completed();
    }

    /// Leave the room and hand back the surface with every marker removed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Renderer`] if the renderer task panicked; the
    /// surface is lost in that case.
    pub async fn leave(self) -> Result<S, SessionError> {
        let Self { room_id, channel, persister, follower, renderer, .. } = self;

        follower.abort();
        persister.shutdown().await;
        channel.close();
        let renderer = renderer.await?;

        info!(%room_id, "session: left room");
        Ok(renderer.teardown())
    }
}

/// Raster dimensions for `bounds`, rounded and capped at [`MAX_RASTER_DIM`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn raster_size(bounds: SurfaceBounds) -> (u32, u32) {
    let clamp = |v: f64| v.round().clamp(0.0, f64::from(MAX_RASTER_DIM)) as u32;
    (clamp(bounds.width), clamp(bounds.height))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
