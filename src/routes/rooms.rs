//! Room snapshot routes.
//!
//! A `PUT` is a snapshot write like any other: it replaces the stored image
//! and every room member following the change feed picks it up.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::ids::RoomId;
use crate::snapshot::raster::{ImageData, RasterBuffer};
use crate::snapshot::store::StoreError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    pub image_data: ImageData,
}

/// `GET /api/rooms/:id/snapshot` — latest committed snapshot.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<SnapshotBody>, StatusCode> {
    let room_id = RoomId::from(room_id);
    let image_data = state
        .snapshots
        .read_latest(&room_id)
        .await
        .map_err(|e| store_error_to_status(&room_id, &e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(SnapshotBody { image_data }))
}

/// `PUT /api/rooms/:id/snapshot` — replace the room's snapshot.
pub async fn put_snapshot(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<SnapshotBody>,
) -> Result<StatusCode, StatusCode> {
    let room_id = RoomId::from(room_id);
    if let Err(e) = RasterBuffer::decode(&body.image_data) {
        warn!(%room_id, error = %e, "rejecting undecodable snapshot");
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .snapshots
        .write_snapshot(&room_id, &body.image_data)
        .await
        .map_err(|e| store_error_to_status(&room_id, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

fn store_error_to_status(room_id: &RoomId, err: &StoreError) -> StatusCode {
    error!(%room_id, error = %err, "snapshot store request failed");
    match err {
        StoreError::Database(_) | StoreError::Http(_) | StoreError::Channel(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
