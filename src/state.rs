//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the room hub that websocket connections join, plus the
//! snapshot store and profile lookup behind their trait seams so tests can
//! swap in in-memory versions.

use std::sync::Arc;

use sqlx::PgPool;

use crate::channel::hub::RoomHub;
use crate::profile::{PgProfileLookup, ProfileLookup};
use crate::snapshot::store::{PgSnapshotStore, SnapshotStore};

/// Shared application state. Clone is required by Axum; every field is
/// Arc-wrapped or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub hub: RoomHub,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub profiles: Arc<dyn ProfileLookup>,
}

impl AppState {
    /// Postgres-backed state.
    #[must_use]
    pub fn new(pool: PgPool, room_channel_capacity: usize) -> Self {
        Self::with_stores(
            RoomHub::new(room_channel_capacity),
            Arc::new(PgSnapshotStore::new(pool.clone())),
            Arc::new(PgProfileLookup::new(pool)),
        )
    }

    #[must_use]
    pub fn with_stores(hub: RoomHub, snapshots: Arc<dyn SnapshotStore>, profiles: Arc<dyn ProfileLookup>) -> Self {
        Self { hub, snapshots, profiles }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;
