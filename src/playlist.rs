//! Year-bucketed playlist allocation with overflow rotation.
//!
//! Each year maps to a sequence of playlists `(year, 1), (year, 2), ...`;
//! the highest sequence number on record is the current bucket. Buckets are
//! created lazily and never deleted; a full one is permanently retired in
//! favor of the next sequence number.
//!
//! Overflow detection cannot trust the append error class alone: Spotify
//! reports capacity exhaustion and unrelated failures (rate limits among
//! them) under the same statuses. An append failure is therefore only acted
//! on after the live track total confirms the bucket is at the hard cap;
//! an unconfirmed hint is re-raised as a fatal error.

use log::warn;

use crate::error::SyncError;
use crate::spotify::MatchService;
use crate::store::CatalogStore;

/// Hard per-playlist capacity on the service side.
pub const PLAYLIST_MAX_LENGTH: u32 = 11_000;

fn playlist_name(year: i32, num: u32) -> String {
    if num > 1 {
        format!("Rediscover {year} ({num})")
    } else {
        format!("Rediscover {year}")
    }
}

/// Current bucket for a year, creating sequence 1 on first use.
fn allocate<S: MatchService>(
    store: &CatalogStore,
    service: &mut S,
    year: i32,
) -> Result<(String, u32), SyncError> {
    match store.current_playlist(year)? {
        Some(bucket) => Ok(bucket),
        None => create(store, service, year, 1),
    }
}

/// Create the playlist for `(year, num)` and persist the bucket mapping.
fn create<S: MatchService>(
    store: &CatalogStore,
    service: &mut S,
    year: i32,
    num: u32,
) -> Result<(String, u32), SyncError> {
    let playlist_id = service.create_playlist(&playlist_name(year, num))?;
    store.put_playlist(year, num, &playlist_id)?;
    Ok((playlist_id, num))
}

/// Append a matched track to the current bucket for `year`, rotating to the
/// next sequence number on confirmed overflow. The post-rotation retry
/// happens exactly once; a second capacity hint is fatal.
///
/// Returns the id of the playlist the track actually landed in.
pub fn append_to_year<S: MatchService>(
    store: &CatalogStore,
    service: &mut S,
    year: i32,
    uri: &str,
) -> Result<String, SyncError> {
    let (playlist_id, num) = allocate(store, service, year)?;
    let status = match service.add_to_playlist(&playlist_id, uri) {
        Ok(()) => return Ok(playlist_id),
        Err(SyncError::CapacityHint { status }) => status,
        Err(err) => return Err(err),
    };

    // Suspected overflow. Only the authoritative count decides; the same
    // statuses also cover transient rate limiting.
    let total = service.playlist_total(&playlist_id)?;
    if total != PLAYLIST_MAX_LENGTH {
        return Err(SyncError::Transport(format!(
            "append to playlist {playlist_id} failed (http {status}) \
             but total {total} is below capacity; not rotating"
        )));
    }

    warn!("playlist {playlist_id} ({year} #{num}) is full, rotating to #{}", num + 1);
    let (next_id, next_num) = create(store, service, year, num + 1)?;
    match service.add_to_playlist(&next_id, uri) {
        Ok(()) => Ok(next_id),
        Err(SyncError::CapacityHint { status }) => Err(SyncError::Transport(format!(
            "append to freshly rotated playlist {next_id} ({year} #{next_num}) \
             still reported capacity (http {status})"
        ))),
        Err(err) => Err(err),
    }
}
