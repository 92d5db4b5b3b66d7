//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the room websocket, the snapshot REST endpoints, and the profile
//! endpoint that remote presence clients resolve colors from, all under a
//! single Axum router.

pub mod rooms;
pub mod users;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route(
            "/api/rooms/{id}/snapshot",
            get(rooms::get_snapshot).put(rooms::put_snapshot),
        )
        .route("/api/users/{id}/profile", get(users::user_profile))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
pub(crate) mod tests;
