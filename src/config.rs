//! Runtime configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a compiled-in default. Unparseable values fall back to the
//! default rather than failing startup; only `DATABASE_URL` is required, and
//! only by the server binary.

use std::time::Duration;

use crate::ids::ParticipantId;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SNAPSHOT_QUIET_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CURSOR_MIN_INTERVAL_MS: u64 = 0;
pub const DEFAULT_CURSOR_IDLE_TIMEOUT_MS: u64 = 0;
pub const DEFAULT_CURSOR_COLOR: &str = "#8a8178";
pub const DEFAULT_ROOM_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// `0` disables a millisecond knob.
fn optional_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Tuning for the presence broadcaster and renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Minimum spacing between cursor publishes. `None` publishes every move.
    pub min_publish_interval: Option<Duration>,
    /// Remove markers idle for this long. `None` keeps them until teardown.
    pub idle_timeout: Option<Duration>,
    /// Color used when a participant's profile lookup fails.
    pub default_color: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { min_publish_interval: None, idle_timeout: None, default_color: DEFAULT_CURSOR_COLOR.to_owned() }
    }
}

impl PresenceConfig {
    /// - `CURSOR_MIN_INTERVAL_MS`: default 0 (disabled)
    /// - `CURSOR_IDLE_TIMEOUT_MS`: default 0 (disabled)
    /// - `DEFAULT_CURSOR_COLOR`: default `#8a8178`
    #[must_use]
    pub fn from_env() -> Self {
        let default_color = std::env::var("DEFAULT_CURSOR_COLOR")
            .ok()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CURSOR_COLOR.to_owned());
        Self {
            min_publish_interval: optional_ms(env_parse("CURSOR_MIN_INTERVAL_MS", DEFAULT_CURSOR_MIN_INTERVAL_MS)),
            idle_timeout: optional_ms(env_parse("CURSOR_IDLE_TIMEOUT_MS", DEFAULT_CURSOR_IDLE_TIMEOUT_MS)),
            default_color,
        }
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Tuning for the debounced snapshot persister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistConfig {
    /// Trailing debounce window after the last stroke.
    pub quiet_interval: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self { quiet_interval: Duration::from_millis(DEFAULT_SNAPSHOT_QUIET_INTERVAL_MS) }
    }
}

impl PersistConfig {
    /// - `SNAPSHOT_QUIET_INTERVAL_MS`: default 1000; 0 falls back to the default
    #[must_use]
    pub fn from_env() -> Self {
        let ms = env_parse("SNAPSHOT_QUIET_INTERVAL_MS", DEFAULT_SNAPSHOT_QUIET_INTERVAL_MS);
        let ms = if ms == 0 { DEFAULT_SNAPSHOT_QUIET_INTERVAL_MS } else { ms };
        Self { quiet_interval: Duration::from_millis(ms) }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Server process settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    /// Per-subscriber queue depth on the room hub.
    pub room_channel_capacity: usize,
}

impl ServerConfig {
    /// - `DATABASE_URL`: required by the binary
    /// - `PORT`: default 3000
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `ROOM_CHANNEL_CAPACITY`: default 256
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            port: env_parse("PORT", DEFAULT_PORT),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            room_channel_capacity: env_parse("ROOM_CHANNEL_CAPACITY", DEFAULT_ROOM_CHANNEL_CAPACITY).max(1),
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Settings for a participant joining rooms on a remote server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://127.0.0.1:3000`.
    pub server_url: String,
    /// `None` joins receive-only.
    pub participant_id: Option<ParticipantId>,
    pub presence: PresenceConfig,
    pub persist: PersistConfig,
}

impl ClientConfig {
    /// Default tuning against `server_url`.
    #[must_use]
    pub fn new(server_url: impl Into<String>, participant_id: Option<ParticipantId>) -> Self {
        Self {
            server_url: server_url.into(),
            participant_id,
            presence: PresenceConfig::default(),
            persist: PersistConfig::default(),
        }
    }

    /// - `SYNCPAD_SERVER_URL`: default `http://127.0.0.1:3000`
    /// - `SYNCPAD_PARTICIPANT_ID`: unset or empty joins receive-only
    /// - plus every [`PresenceConfig`] and [`PersistConfig`] key
    #[must_use]
    pub fn from_env() -> Self {
        let server_url = std::env::var("SYNCPAD_SERVER_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_owned());
        let participant_id = std::env::var("SYNCPAD_PARTICIPANT_ID")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(ParticipantId::from);
        Self { server_url, participant_id, presence: PresenceConfig::from_env(), persist: PersistConfig::from_env() }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
