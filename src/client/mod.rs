//! Remote room client.
//!
//! DESIGN
//! ======
//! Builds a [`SessionContext`] whose collaborators all talk to a syncpad
//! server, so a [`RoomSession`] runs the same presence and snapshot code
//! remotely as it does against the in-process hub:
//! - [`WsRoomChannel`]: room events over `/api/ws`
//! - [`HttpSnapshotStore`]: snapshot reads/writes over REST, change feed
//!   from the channel's `snapshot:changed` events
//! - [`HttpProfileLookup`]: cursor colors from `/api/users/{id}/profile`

pub mod http;
pub mod ws;

use std::sync::Arc;

pub use http::HttpSnapshotStore;
pub use ws::WsRoomChannel;

use crate::config::ClientConfig;
use crate::ids::RoomId;
use crate::presence::{MarkerSurface, SurfaceBounds};
use crate::profile::{HttpProfileLookup, ProfileError};
use crate::session::{RoomSession, SessionContext, SessionError};
use crate::snapshot::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("server returned error for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Join `room_id` on the configured server and assemble the remote
/// collaborators for a session.
///
/// # Errors
///
/// Returns an error if the websocket join fails or an HTTP client cannot
/// be built.
pub async fn connect(config: &ClientConfig, room_id: RoomId) -> Result<SessionContext, ClientError> {
    let channel = Arc::new(WsRoomChannel::connect(&config.server_url, &room_id, config.participant_id.as_ref()).await?);
    let store = HttpSnapshotStore::new(&config.server_url, channel.clone())?;
    let profiles = HttpProfileLookup::new(&config.server_url)?;
    Ok(SessionContext {
        room_id,
        participant: config.participant_id.clone(),
        channel,
        profiles: Arc::new(profiles),
        store: Arc::new(store),
    })
}

/// [`connect`], then enter the room with the config's presence and
/// persistence tuning.
///
/// # Errors
///
/// Returns an error if connecting fails or the session cannot subscribe.
pub async fn enter_room<S>(
    config: &ClientConfig,
    room_id: RoomId,
    surface: S,
    bounds: SurfaceBounds,
) -> Result<RoomSession<S>, ClientError>
where
    S: MarkerSurface + Send + 'static,
    S::Marker: Send,
{
    let ctx = connect(config, room_id).await?;
    Ok(RoomSession::enter(ctx, surface, bounds, &config.presence, config.persist).await?)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
