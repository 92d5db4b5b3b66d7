//! Profile lookup — out-of-band participant display data.
//!
//! DESIGN
//! ======
//! Presence only needs a participant's display color, fetched once per
//! session. [`ProfileLookup`] is the seam; the server resolves profiles from
//! Postgres, remote embedders resolve them over HTTP from the server's
//! `/api/users/{id}/profile` route.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::ids::ParticipantId;

const DEFAULT_PROFILE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_color: String,
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(ParticipantId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Resolve a participant's profile. May be slow and may fail.
#[async_trait::async_trait]
pub trait ProfileLookup: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ProfileError::NotFound`] for unknown participants, or a
    /// transport error from the backing store.
    async fn fetch_profile(&self, participant_id: &ParticipantId) -> Result<Profile, ProfileError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgProfileLookup {
    pool: PgPool,
}

impl PgProfileLookup {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileLookup for PgProfileLookup {
    async fn fetch_profile(&self, participant_id: &ParticipantId) -> Result<Profile, ProfileError> {
        let row = sqlx::query_as::<_, (String, String)>("SELECT name, color FROM users WHERE id = $1")
            .bind(participant_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some((display_name, display_color)) = row else {
            return Err(ProfileError::NotFound(participant_id.clone()));
        };
        Ok(Profile { display_color, display_name })
    }
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpProfileLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProfileLookup {
    /// `base_url` is the server origin, e.g. `http://localhost:3000`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ProfileError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_PROFILE_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn profile_url(&self, participant_id: &ParticipantId) -> String {
        format!("{}/api/users/{}/profile", self.base_url, participant_id)
    }
}

#[async_trait::async_trait]
impl ProfileLookup for HttpProfileLookup {
    async fn fetch_profile(&self, participant_id: &ParticipantId) -> Result<Profile, ProfileError> {
        let response = self.client.get(self.profile_url(participant_id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProfileError::NotFound(participant_id.clone()));
        }
        Ok(response.error_for_status()?.json::<Profile>().await?)
    }
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
