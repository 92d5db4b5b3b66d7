use syncpad::config::ServerConfig;
use syncpad::{db, routes, services, state};

#[tokio::main]
async fn main() {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    let database_url = config.database_url.as_deref().expect("DATABASE_URL required");

    let pool = db::init_pool(database_url, config.db_max_connections)
        .await
        .expect("database init failed");
    let state = state::AppState::new(pool, config.room_channel_capacity);

    // Spawn background change relay.
    let _relay = services::relay::spawn_change_relay(state.hub.clone(), state.snapshots.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "syncpad listening");
    axum::serve(listener, app).await.expect("server failed");
}
