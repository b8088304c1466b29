//! Core data models for the catalog-to-Spotify migration.

use serde::{Deserialize, Serialize};

// ============================================================================
// Catalog Models
// ============================================================================

/// One catalog record, as stored in the `tracks` table.
///
/// Records pre-exist in the catalog and are only ever annotated: once
/// `spotify_uri` or `unresolved` is set it is never cleared.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: i64,
    pub name: String,
    pub release_year: i32,
    pub first_charted_year: Option<i32>,
    pub spotify_uri: Option<String>,
    pub playlist_id: Option<String>,
    pub unresolved: bool,
}

/// Terminal-state view of a track. Exactly one variant holds at any time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Neither matched nor written off; a future pass may retry.
    Pending,
    /// Matched on Spotify and appended to a year playlist.
    Resolved {
        uri: String,
        playlist_id: Option<String>,
    },
    /// Permanently unmatchable (placeholder-only or malformed name).
    Unresolved,
}

impl Track {
    pub fn resolution(&self) -> Resolution {
        match (&self.spotify_uri, self.unresolved) {
            (Some(uri), _) => Resolution::Resolved {
                uri: uri.clone(),
                playlist_id: self.playlist_id.clone(),
            },
            (None, true) => Resolution::Unresolved,
            (None, false) => Resolution::Pending,
        }
    }

    /// True once a resolution has been recorded. Terminal tracks are
    /// skipped on re-visits, which is what makes wrap-around safe.
    pub fn is_terminal(&self) -> bool {
        self.spotify_uri.is_some() || self.unresolved
    }
}

// ============================================================================
// Session Models
// ============================================================================

/// Cached OAuth token blob, persisted as JSON in the `cursors` table and
/// passed through the restore -> refresh -> store cycle once per invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: String,
}

// ============================================================================
// Driver Models
// ============================================================================

/// Why the migration loop stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StopReason {
    /// The wall-clock budget ran out between records.
    #[default]
    Deadline,
    /// A fatal error was logged; the cursor stays at the last committed
    /// position so the next invocation resumes cleanly.
    Fatal,
}

/// Summary of a single driver invocation.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub stop: StopReason,
    pub final_position: i64,
    pub visited: u64,
    pub resolved: u64,
    pub marked_unresolved: u64,
    pub left_pending: u64,
    pub already_terminal: u64,
    pub wraps: u64,
}
