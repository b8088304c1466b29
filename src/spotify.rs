//! Spotify Web API client and the `MatchService` seam the driver runs
//! against.
//!
//! The client is deliberately thin: one exact-field search per record, no
//! retries (retry policy lives in the driver and the playlist allocator),
//! and a refresh-token session established once per invocation with the
//! token blob cached in the catalog store.

use log::info;
use serde::Deserialize;
use std::time::Duration;

use crate::error::SyncError;
use crate::models::TokenInfo;
use crate::store::CatalogStore;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Status codes Spotify conflates between "playlist is full" and unrelated
/// failures. A hint only; the allocator confirms before acting on it.
const CAPACITY_HINT_STATUSES: [u16; 2] = [403, 500];

/// External matching service boundary. The driver and the playlist
/// allocator are generic over this so tests run against an in-memory fake.
pub trait MatchService {
    /// Restore -> refresh -> store the session token. Called once per
    /// invocation, before any record is touched; failure is fatal.
    fn establish_session(&mut self, cache: &CatalogStore) -> Result<(), SyncError>;

    /// Best single match for an exact artist+title query, or `None`.
    /// "No match" is distinct from an error.
    fn search_track(&mut self, artist: &str, title: &str) -> Result<Option<String>, SyncError>;

    fn create_playlist(&mut self, name: &str) -> Result<String, SyncError>;

    /// Append one track reference. `SyncError::CapacityHint` is the
    /// suspected-overflow signal; everything else maps to `Transport`.
    fn add_to_playlist(&mut self, playlist_id: &str, uri: &str) -> Result<(), SyncError>;

    /// Authoritative live item count, used to confirm a capacity hint.
    fn playlist_total(&mut self, playlist_id: &str) -> Result<u32, SyncError>;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_id: String,
    /// Seeds the session when the token cache is empty (first deployment).
    pub seed_refresh_token: Option<String>,
}

impl SpotifyConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        Ok(SpotifyConfig {
            client_id: require_env("SPOTIFY_CLIENT_ID")?,
            client_secret: require_env("SPOTIFY_CLIENT_SECRET")?,
            user_id: require_env("SPOTIFY_USER_ID")?,
            seed_refresh_token: std::env::var("SPOTIFY_REFRESH_TOKEN").ok(),
        })
    }
}

fn require_env(name: &str) -> Result<String, SyncError> {
    std::env::var(name).map_err(|_| SyncError::Auth(format!("{name} is unset")))
}

// ============================================================================
// Client
// ============================================================================

pub struct SpotifyClient {
    agent: ureq::Agent,
    config: SpotifyConfig,
    access_token: Option<String>,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .build();
        SpotifyClient {
            agent,
            config,
            access_token: None,
        }
    }

    fn refresh(&self, refresh_token: &str) -> Result<TokenInfo, SyncError> {
        let response = self
            .agent
            .post(TOKEN_URL)
            .send_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ])
            .map_err(|err| SyncError::Auth(err.to_string()))?;
        let refreshed: TokenResponse = response
            .into_json()
            .map_err(|err| SyncError::Auth(err.to_string()))?;
        Ok(TokenInfo {
            access_token: refreshed.access_token,
            // Spotify may omit the refresh token from the response; the old
            // one stays valid in that case.
            refresh_token: refreshed
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
        })
    }

    fn bearer(&self) -> Result<String, SyncError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| SyncError::Auth("session not established".to_string()))?;
        Ok(format!("Bearer {token}"))
    }
}

/// Exact-field query restricted to one result, the shape the search
/// endpoint treats as a field filter rather than free text.
fn search_query(artist: &str, title: &str) -> String {
    format!("track:\"{title}\" artist:\"{artist}\"")
}

impl MatchService for SpotifyClient {
    fn establish_session(&mut self, cache: &CatalogStore) -> Result<(), SyncError> {
        let refresh_token = match cache.restore_token()? {
            Some(token) => token.refresh_token,
            None => self.config.seed_refresh_token.clone().ok_or_else(|| {
                SyncError::Auth(
                    "no cached session and SPOTIFY_REFRESH_TOKEN is unset".to_string(),
                )
            })?,
        };
        let token = self.refresh(&refresh_token)?;
        cache.store_token(&token)?;
        self.access_token = Some(token.access_token);
        info!("spotify session refreshed");
        Ok(())
    }

    fn search_track(&mut self, artist: &str, title: &str) -> Result<Option<String>, SyncError> {
        let response = self
            .agent
            .get(&format!("{API_BASE}/search"))
            .set("Authorization", &self.bearer()?)
            .query("q", &search_query(artist, title))
            .query("type", "track")
            .query("limit", "1")
            .call()
            .map_err(SyncError::transport)?;
        let found: SearchResponse = response.into_json().map_err(SyncError::transport)?;
        Ok(found.tracks.items.into_iter().next().map(|item| item.uri))
    }

    fn create_playlist(&mut self, name: &str) -> Result<String, SyncError> {
        let response = self
            .agent
            .post(&format!("{API_BASE}/users/{}/playlists", self.config.user_id))
            .set("Authorization", &self.bearer()?)
            .send_json(serde_json::json!({ "name": name, "public": true }))
            .map_err(SyncError::transport)?;
        let created: CreatedPlaylist = response.into_json().map_err(SyncError::transport)?;
        Ok(created.id)
    }

    fn add_to_playlist(&mut self, playlist_id: &str, uri: &str) -> Result<(), SyncError> {
        let result = self
            .agent
            .post(&format!("{API_BASE}/playlists/{playlist_id}/tracks"))
            .set("Authorization", &self.bearer()?)
            .send_json(serde_json::json!({ "uris": [uri] }));
        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) if CAPACITY_HINT_STATUSES.contains(&status) => {
                Err(SyncError::CapacityHint { status })
            }
            Err(err) => Err(SyncError::transport(err)),
        }
    }

    fn playlist_total(&mut self, playlist_id: &str) -> Result<u32, SyncError> {
        let response = self
            .agent
            .get(&format!("{API_BASE}/playlists/{playlist_id}"))
            .set("Authorization", &self.bearer()?)
            .query("fields", "tracks(total)")
            .call()
            .map_err(SyncError::transport)?;
        let playlist: PlaylistTotals = response.into_json().map_err(SyncError::transport)?;
        Ok(playlist.tracks.total)
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: SearchPage,
}

#[derive(Deserialize)]
struct SearchPage {
    items: Vec<FoundTrack>,
}

#[derive(Deserialize)]
struct FoundTrack {
    uri: String,
}

#[derive(Deserialize)]
struct CreatedPlaylist {
    id: String,
}

#[derive(Deserialize)]
struct PlaylistTotals {
    tracks: TrackTotal,
}

#[derive(Deserialize)]
struct TrackTotal {
    total: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_shape() {
        assert_eq!(
            search_query("Daft Punk", "Around the World"),
            "track:\"Around the World\" artist:\"Daft Punk\""
        );
    }
}
