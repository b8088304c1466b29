//! Error taxonomy for the migration loop.
//!
//! The driver treats these very differently: `NotFound` drives cursor
//! wrap-around, `CapacityHint` is resolved locally by the playlist allocator,
//! everything else stops the invocation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// No track exists at this catalog position. Recoverable: the driver
    /// uses it to detect the end of known data and wrap to the start.
    #[error("track {0} not found in catalog")]
    NotFound(i64),

    /// Session restore/refresh failed before the loop started.
    #[error("spotify session refresh failed: {0}")]
    Auth(String),

    /// A playlist append came back with the error class Spotify uses for
    /// both capacity exhaustion and unrelated failures. Only a hint; the
    /// allocator confirms against the live track total before rotating.
    #[error("playlist append returned capacity hint (http {status})")]
    CapacityHint { status: u16 },

    /// Any other external-service failure. Fatal for the invocation.
    #[error("spotify request failed: {0}")]
    Transport(String),

    #[error("catalog store error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A write would have replaced one terminal resolution with a different
    /// one. Terminal state is write-once; identical re-writes are no-ops.
    #[error("track {id}: refusing to overwrite terminal state")]
    TerminalConflict { id: i64 },
}

impl SyncError {
    /// Wrap a non-capacity HTTP failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        SyncError::Transport(err.to_string())
    }
}
