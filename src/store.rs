//! SQLite-backed catalog store.
//!
//! Three tables back the whole system: `tracks` (the records being
//! annotated), `cursors` (the durable loop position plus the cached session
//! token), and `playlists` (the year -> playlist bucket mapping).
//!
//! Terminal state is write-once and enforced here: `mark_resolved` /
//! `mark_unresolved` use guarded UPDATEs so a re-run over the same record is
//! a no-op and a conflicting overwrite is an error, never a silent clobber.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::SyncError;
use crate::models::{Resolution, TokenInfo, Track};

/// Row key of the migration cursor in the `cursors` table.
const CURSOR_NAME: &str = "rediscover";
/// Row key of the cached OAuth token in the `cursors` table.
const TOKEN_NAME: &str = "token";

pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                release_year INTEGER NOT NULL,
                first_charted_year INTEGER,
                spotify_uri TEXT,
                playlist_id TEXT,
                unresolved INTEGER
            );

            CREATE TABLE IF NOT EXISTS cursors (
                name TEXT PRIMARY KEY,
                position INTEGER,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS playlists (
                year INTEGER NOT NULL,
                num INTEGER NOT NULL,
                playlist_id TEXT NOT NULL,
                PRIMARY KEY (year, num)
            );",
        )?;
        Ok(CatalogStore { conn })
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    pub fn track(&self, id: i64) -> Result<Option<Track>, SyncError> {
        let row = self
            .conn
            .prepare_cached(
                "SELECT id, name, release_year, first_charted_year,
                        spotify_uri, playlist_id, unresolved
                 FROM tracks WHERE id = ?1",
            )?
            .query_row(params![id], |row| {
                Ok(Track {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    release_year: row.get(2)?,
                    first_charted_year: row.get(3)?,
                    spotify_uri: row.get(4)?,
                    playlist_id: row.get(5)?,
                    unresolved: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Record a successful match. Only a pending track is written; repeating
    /// the identical write is a no-op, anything else is a conflict.
    pub fn mark_resolved(
        &self,
        id: i64,
        uri: &str,
        playlist_id: &str,
    ) -> Result<(), SyncError> {
        let changed = self.conn.execute(
            "UPDATE tracks SET spotify_uri = ?1, playlist_id = ?2
             WHERE id = ?3 AND spotify_uri IS NULL AND unresolved IS NULL",
            params![uri, playlist_id, id],
        )?;
        if changed == 1 {
            return Ok(());
        }
        self.check_idempotent_write(
            id,
            &Resolution::Resolved {
                uri: uri.to_string(),
                playlist_id: Some(playlist_id.to_string()),
            },
        )
    }

    /// Permanently write a track off as unmatchable.
    pub fn mark_unresolved(&self, id: i64) -> Result<(), SyncError> {
        let changed = self.conn.execute(
            "UPDATE tracks SET unresolved = 1
             WHERE id = ?1 AND spotify_uri IS NULL AND unresolved IS NULL",
            params![id],
        )?;
        if changed == 1 {
            return Ok(());
        }
        self.check_idempotent_write(id, &Resolution::Unresolved)
    }

    /// A guarded terminal write touched no rows: either the track vanished,
    /// the identical resolution is already present (fine), or a different
    /// one is (refused).
    fn check_idempotent_write(&self, id: i64, wanted: &Resolution) -> Result<(), SyncError> {
        match self.track(id)? {
            None => Err(SyncError::NotFound(id)),
            Some(track) if track.resolution() == *wanted => Ok(()),
            Some(_) => Err(SyncError::TerminalConflict { id }),
        }
    }

    /// Highest existing track id, 0 when the catalog is empty. Single
    /// reverse-ordered lookup; the driver memoizes the result per run.
    pub fn last_track_id(&self) -> Result<i64, SyncError> {
        let id = self
            .conn
            .query_row("SELECT id FROM tracks ORDER BY id DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id.unwrap_or(0))
    }

    // ========================================================================
    // Cursor
    // ========================================================================

    pub fn cursor(&self) -> Result<i64, SyncError> {
        let position = self
            .conn
            .query_row(
                "SELECT position FROM cursors WHERE name = ?1",
                params![CURSOR_NAME],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position.unwrap_or(0))
    }

    pub fn set_cursor(&self, position: i64) -> Result<(), SyncError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cursors (name, position) VALUES (?1, ?2)",
            params![CURSOR_NAME, position],
        )?;
        Ok(())
    }

    // ========================================================================
    // Playlist buckets
    // ========================================================================

    /// Current bucket for a year: the highest sequence number on record.
    pub fn current_playlist(&self, year: i32) -> Result<Option<(String, u32)>, SyncError> {
        let row = self
            .conn
            .prepare_cached(
                "SELECT playlist_id, num FROM playlists
                 WHERE year = ?1 ORDER BY num DESC LIMIT 1",
            )?
            .query_row(params![year], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        Ok(row)
    }

    pub fn put_playlist(&self, year: i32, num: u32, playlist_id: &str) -> Result<(), SyncError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO playlists (year, num, playlist_id) VALUES (?1, ?2, ?3)",
            params![year, num, playlist_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Session token cache
    // ========================================================================

    pub fn restore_token(&self) -> Result<Option<TokenInfo>, SyncError> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM cursors WHERE name = ?1",
                params![TOKEN_NAME],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| SyncError::Auth(format!("corrupt cached token: {err}"))),
        }
    }

    pub fn store_token(&self, token: &TokenInfo) -> Result<(), SyncError> {
        let json = serde_json::to_string(token)
            .map_err(|err| SyncError::Auth(format!("failed to encode token: {err}")))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO cursors (name, value) VALUES (?1, ?2)",
            params![TOKEN_NAME, json],
        )?;
        Ok(())
    }

    // ========================================================================
    // Test fixtures
    // ========================================================================

    /// Insert a bare pending track. Used by tests and backfill tooling;
    /// the migration itself never creates records.
    pub fn insert_track(
        &self,
        id: i64,
        name: &str,
        release_year: i32,
        first_charted_year: Option<i32>,
    ) -> Result<(), SyncError> {
        self.conn.execute(
            "INSERT INTO tracks (id, name, release_year, first_charted_year)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, name, release_year, first_charted_year],
        )?;
        Ok(())
    }
}
