//! Whiteboard raster snapshots: encoding, durable storage, debounced
//! persistence, and the follow-the-feed sync loop.

pub mod persister;
pub mod raster;
pub mod store;
pub mod sync;

use std::sync::{Arc, Mutex};

pub use persister::SnapshotPersister;
pub use raster::{ImageData, RasterBuffer, RasterError, Rgba, Stroke};
pub use store::{MemorySnapshotStore, PgSnapshotStore, SnapshotChange, SnapshotStore, StoreError};

/// The room's local raster, shared by the drawing side, the persister, and
/// the change-feed follower.
pub type SharedRaster = Arc<Mutex<RasterBuffer>>;
