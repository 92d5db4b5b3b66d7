use super::*;
use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use crate::state::test_helpers::lazy_pool;

async fn profile_route(Path(id): Path<String>) -> axum::response::Response {
    if id == "ghost" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(serde_json::json!({"displayColor": "#22c55e", "displayName": format!("user {id}")})).into_response()
}

async fn spawn_profile_server() -> String {
    let app = Router::new().route("/api/users/{id}/profile", get(profile_route));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/")
}

#[test]
fn profile_uses_camel_case_keys() {
    let profile = Profile { display_color: "#fff".into(), display_name: "Ada".into() };
    let json = serde_json::to_value(&profile).expect("serialize");
    assert_eq!(json, serde_json::json!({"displayColor": "#fff", "displayName": "Ada"}));
}

#[test]
fn http_lookup_builds_profile_url() {
    let lookup = HttpProfileLookup::new("http://localhost:3000/").expect("client");
    assert_eq!(
        lookup.profile_url(&ParticipantId::from("u-1")),
        "http://localhost:3000/api/users/u-1/profile"
    );
}

#[tokio::test]
async fn http_lookup_fetches_profile() {
    let base = spawn_profile_server().await;
    let lookup = HttpProfileLookup::new(&base).expect("client");

    let profile = lookup
        .fetch_profile(&ParticipantId::from("u-7"))
        .await
        .expect("profile");
    assert_eq!(profile.display_color, "#22c55e");
    assert_eq!(profile.display_name, "user u-7");
}

#[tokio::test]
async fn http_lookup_maps_404_to_not_found() {
    let base = spawn_profile_server().await;
    let lookup = HttpProfileLookup::new(&base).expect("client");

    let err = lookup
        .fetch_profile(&ParticipantId::from("ghost"))
        .await
        .expect_err("missing profile");
    assert!(matches!(err, ProfileError::NotFound(_)));
}

#[tokio::test]
async fn pg_lookup_surfaces_database_errors() {
    let lookup = PgProfileLookup::new(lazy_pool());

    let err = lookup
        .fetch_profile(&ParticipantId::from("u-1"))
        .await
        .expect_err("no database available");
    assert!(matches!(err, ProfileError::Database(_)));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn pg_lookup_maps_user_row_to_profile() {
    let pool = crate::state::test_helpers::integration_pool().await;
    let id = format!("live-{}", uuid::Uuid::new_v4());
    sqlx::query("INSERT INTO users (id, name, color) VALUES ($1, $2, $3)")
        .bind(&id)
        .bind("Ada")
        .bind("#123456")
        .execute(&pool)
        .await
        .expect("seed user");
    let lookup = PgProfileLookup::new(pool);

    let profile = lookup.fetch_profile(&ParticipantId::from(id.as_str())).await.expect("profile");
    assert_eq!(profile, Profile { display_color: "#123456".into(), display_name: "Ada".into() });

    let err = lookup
        .fetch_profile(&ParticipantId::new(format!("{id}-missing")))
        .await
        .expect_err("unknown user");
    assert!(matches!(err, ProfileError::NotFound(_)));
}
