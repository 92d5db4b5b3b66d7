//! User profile routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::error;

use crate::ids::ParticipantId;
use crate::profile::{Profile, ProfileError};
use crate::state::AppState;

/// `GET /api/users/:id/profile` — display data for presence markers.
pub async fn user_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Profile>, StatusCode> {
    let participant_id = ParticipantId::from(user_id);
    state
        .profiles
        .fetch_profile(&participant_id)
        .await
        .map(Json)
        .map_err(|e| profile_error_to_status(&e))
}

fn profile_error_to_status(err: &ProfileError) -> StatusCode {
    match err {
        ProfileError::NotFound(_) => StatusCode::NOT_FOUND,
        ProfileError::Database(_) | ProfileError::Http(_) => {
            error!(error = %err, "profile lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
#[path = "users_test.rs"]
mod tests;
