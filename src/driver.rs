//! The execution-window-bounded migration loop.
//!
//! Each invocation resumes from the durable cursor, processes records in
//! increasing id order until the wall-clock budget runs out, and wraps to
//! the start of the catalog on running off the end of known data. Failure
//! policy lives entirely here: a missing record drives wrap-around, any
//! other error during a record stops the loop without advancing the cursor
//! past the failed attempt, and the next scheduled invocation picks up from
//! the last committed position.

use log::{debug, error, info};
use std::time::{Duration, Instant};

use crate::error::SyncError;
use crate::models::{RunReport, StopReason, Track};
use crate::normalize::TrackName;
use crate::playlist;
use crate::spotify::MatchService;
use crate::store::CatalogStore;

/// Records released or first charted before this are clamped up into the
/// 2006 bucket rather than producing a long tail of near-empty playlists.
pub const MIN_YEAR: i32 = 2006;

/// Default wall-clock budget per invocation, sized to leave headroom inside
/// a 120-second scheduler slot.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(110);

/// Outcome of one record attempt.
enum StepOutcome {
    AlreadyTerminal,
    MarkedUnresolved,
    NoMatch,
    Resolved,
}

pub struct Driver<'a, S: MatchService> {
    store: &'a CatalogStore,
    service: &'a mut S,
    budget: Duration,
    max_steps: Option<u64>,
    // Computed at most once per run; staleness within a run is fine since
    // it only decides wrap-around, never correctness.
    last_known: Option<i64>,
}

impl<'a, S: MatchService> Driver<'a, S> {
    pub fn new(store: &'a CatalogStore, service: &'a mut S, budget: Duration) -> Self {
        Driver {
            store,
            service,
            budget,
            max_steps: None,
            last_known: None,
        }
    }

    /// Additionally bound the pass by record count. Used by tests and
    /// one-shot backfills; production invocations are bounded by wall
    /// clock alone.
    pub fn limit_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Run one invocation to its deadline.
    ///
    /// A fatal error mid-loop is logged and reported, not returned: the
    /// cursor is durable, so the caller's only job is to schedule the next
    /// invocation. Errors before the loop (session refresh) and cursor
    /// persistence failures do propagate.
    pub fn run(&mut self) -> Result<RunReport, SyncError> {
        self.service.establish_session(self.store)?;

        let started = Instant::now();
        let mut position = self.store.cursor()?;
        let mut report = RunReport::default();
        info!("starting migration pass at cursor {position}");

        let mut steps = 0u64;
        while started.elapsed() < self.budget && self.max_steps.map_or(true, |max| steps < max) {
            steps += 1;
            position += 1;
            match self.step(position) {
                Ok(outcome) => {
                    report.visited += 1;
                    match outcome {
                        StepOutcome::AlreadyTerminal => report.already_terminal += 1,
                        StepOutcome::MarkedUnresolved => report.marked_unresolved += 1,
                        StepOutcome::NoMatch => report.left_pending += 1,
                        StepOutcome::Resolved => report.resolved += 1,
                    }
                }
                Err(SyncError::NotFound(_)) => {
                    let last = self.last_known_id()?;
                    if position >= last {
                        debug!("ran off the end at {position} (last known id {last}), wrapping");
                        position = 0;
                        report.wraps += 1;
                    }
                    // A gap below the last known id just advances past.
                }
                Err(err) => {
                    error!("stopping pass at position {position}: {err}");
                    report.stop = StopReason::Fatal;
                    // The failed attempt's cursor was never written; report
                    // the position the next invocation will resume from.
                    report.final_position = self.store.cursor()?;
                    return Ok(report);
                }
            }
            self.store.set_cursor(position)?;
        }

        report.final_position = position;
        Ok(report)
    }

    fn step(&mut self, position: i64) -> Result<StepOutcome, SyncError> {
        let track = self
            .store
            .track(position)?
            .ok_or(SyncError::NotFound(position))?;

        if track.is_terminal() {
            debug!("{} already terminal, skipping", track.id);
            return Ok(StepOutcome::AlreadyTerminal);
        }

        let name = TrackName::new(&track.name);
        let Some((artist, title)) = name.artist_and_title() else {
            self.store.mark_unresolved(track.id)?;
            info!("{} - {} | unresolvable", track.id, name.as_str());
            return Ok(StepOutcome::MarkedUnresolved);
        };

        let Some(uri) = self.service.search_track(artist, title)? else {
            // Left pending on purpose: the external catalog grows, so a
            // later pass may find a match.
            debug!("{} - {} | no match yet", track.id, name.as_str());
            return Ok(StepOutcome::NoMatch);
        };

        let year = bucket_year(&track);
        let playlist_id = playlist::append_to_year(self.store, self.service, year, &uri)?;
        self.store.mark_resolved(track.id, &uri, &playlist_id)?;
        info!(
            "{} - {} ({}) | {} in {}",
            track.id,
            name.as_str(),
            year,
            uri,
            playlist_id
        );
        Ok(StepOutcome::Resolved)
    }

    fn last_known_id(&mut self) -> Result<i64, SyncError> {
        if let Some(last) = self.last_known {
            return Ok(last);
        }
        let last = self.store.last_track_id()?;
        self.last_known = Some(last);
        Ok(last)
    }
}

/// Bucket year for a track: the earlier of release and first-charted year,
/// clamped up to `MIN_YEAR`.
pub fn bucket_year(track: &Track) -> i32 {
    let year = match track.first_charted_year {
        Some(first_charted) => track.release_year.min(first_charted),
        None => track.release_year,
    };
    year.max(MIN_YEAR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resolution;
    use std::collections::HashMap;

    /// Service fake with a fixed match table and an optional scripted
    /// search failure.
    struct FakeService {
        matches: HashMap<(String, String), String>,
        search_calls: u64,
        fail_search: bool,
        fail_session: bool,
        appends: Vec<(String, String)>,
        next_playlist: u32,
    }

    impl FakeService {
        fn new() -> Self {
            FakeService {
                matches: HashMap::new(),
                search_calls: 0,
                fail_search: false,
                fail_session: false,
                appends: Vec::new(),
                next_playlist: 1,
            }
        }

        fn with_match(mut self, artist: &str, title: &str, uri: &str) -> Self {
            self.matches
                .insert((artist.to_string(), title.to_string()), uri.to_string());
            self
        }
    }

    impl MatchService for FakeService {
        fn establish_session(&mut self, _cache: &CatalogStore) -> Result<(), SyncError> {
            if self.fail_session {
                return Err(SyncError::Auth("refresh rejected".to_string()));
            }
            Ok(())
        }

        fn search_track(
            &mut self,
            artist: &str,
            title: &str,
        ) -> Result<Option<String>, SyncError> {
            self.search_calls += 1;
            if self.fail_search {
                return Err(SyncError::Transport("search unavailable".to_string()));
            }
            Ok(self
                .matches
                .get(&(artist.to_string(), title.to_string()))
                .cloned())
        }

        fn create_playlist(&mut self, _name: &str) -> Result<String, SyncError> {
            let id = format!("pl-{}", self.next_playlist);
            self.next_playlist += 1;
            Ok(id)
        }

        fn add_to_playlist(&mut self, playlist_id: &str, uri: &str) -> Result<(), SyncError> {
            self.appends.push((playlist_id.to_string(), uri.to_string()));
            Ok(())
        }

        fn playlist_total(&mut self, _playlist_id: &str) -> Result<u32, SyncError> {
            Ok(0)
        }
    }

    fn run_steps(store: &CatalogStore, service: &mut FakeService, steps: u64) -> RunReport {
        Driver::new(store, service, Duration::from_secs(60))
            .limit_steps(steps)
            .run()
            .unwrap()
    }

    #[test]
    fn test_end_to_end_resolution() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(5, "Artist - Title", 2008, None).unwrap();
        store.set_cursor(4).unwrap();
        let mut service = FakeService::new().with_match("Artist", "Title", "spotify:track:abc");

        let report = run_steps(&store, &mut service, 1);

        assert_eq!(report.resolved, 1);
        assert_eq!(report.final_position, 5);
        assert_eq!(store.cursor().unwrap(), 5);
        let track = store.track(5).unwrap().unwrap();
        assert_eq!(track.spotify_uri.as_deref(), Some("spotify:track:abc"));
        assert_eq!(track.playlist_id.as_deref(), Some("pl-1"));
        assert_eq!(
            store.current_playlist(2008).unwrap(),
            Some(("pl-1".to_string(), 1))
        );
        assert_eq!(service.appends, vec![("pl-1".to_string(), "spotify:track:abc".to_string())]);
    }

    #[test]
    fn test_terminal_record_is_skipped_without_side_effects() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "Artist - Title", 2008, None).unwrap();
        store.mark_resolved(1, "spotify:track:abc", "pl-old").unwrap();
        let mut service = FakeService::new().with_match("Artist", "Title", "spotify:track:abc");

        let report = run_steps(&store, &mut service, 1);

        assert_eq!(report.already_terminal, 1);
        assert_eq!(service.search_calls, 0);
        assert!(service.appends.is_empty());
        assert_eq!(store.cursor().unwrap(), 1);
        let track = store.track(1).unwrap().unwrap();
        assert_eq!(track.playlist_id.as_deref(), Some("pl-old"));
    }

    #[test]
    fn test_wrap_around_writes_cursor_zero() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(3, "A - B", 2010, None).unwrap();
        store.set_cursor(3).unwrap();
        let mut service = FakeService::new();

        let report = run_steps(&store, &mut service, 1);

        assert_eq!(report.wraps, 1);
        assert_eq!(store.cursor().unwrap(), 0);
    }

    #[test]
    fn test_gap_below_last_id_advances_without_wrapping() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "A - B", 2010, None).unwrap();
        store.insert_track(3, "C - D", 2010, None).unwrap();
        store.set_cursor(1).unwrap();
        let mut service = FakeService::new();

        let report = run_steps(&store, &mut service, 1);

        assert_eq!(report.wraps, 0);
        assert_eq!(store.cursor().unwrap(), 2);
    }

    #[test]
    fn test_year_floor_clamps_bucket() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "Artist - Title", 1990, Some(2010)).unwrap();
        let mut service = FakeService::new().with_match("Artist", "Title", "spotify:track:abc");

        run_steps(&store, &mut service, 1);

        assert!(store.current_playlist(MIN_YEAR).unwrap().is_some());
        assert!(store.current_playlist(1990).unwrap().is_none());
    }

    #[test]
    fn test_no_match_leaves_record_pending() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "Obscure - Deep Cut", 2010, None).unwrap();
        let mut service = FakeService::new();

        let report = run_steps(&store, &mut service, 1);

        assert_eq!(report.left_pending, 1);
        let track = store.track(1).unwrap().unwrap();
        assert_eq!(track.resolution(), Resolution::Pending);
        // Cursor advances regardless: the record is retryable next pass.
        assert_eq!(store.cursor().unwrap(), 1);
    }

    #[test]
    fn test_placeholder_name_marked_unresolved() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "??? - ???", 2010, None).unwrap();
        let mut service = FakeService::new();

        let report = run_steps(&store, &mut service, 1);

        assert_eq!(report.marked_unresolved, 1);
        assert_eq!(service.search_calls, 0);
        assert_eq!(
            store.track(1).unwrap().unwrap().resolution(),
            Resolution::Unresolved
        );
    }

    #[test]
    fn test_fatal_error_stops_without_advancing_cursor() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "A - B", 2010, None).unwrap();
        store.insert_track(2, "C - D", 2010, None).unwrap();
        let mut service = FakeService::new();
        service.fail_search = true;

        let report = run_steps(&store, &mut service, 5);

        assert_eq!(report.stop, StopReason::Fatal);
        assert_eq!(report.final_position, 0);
        assert_eq!(store.cursor().unwrap(), 0);
    }

    #[test]
    fn test_session_failure_propagates_before_loop() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "A - B", 2010, None).unwrap();
        store.set_cursor(0).unwrap();
        let mut service = FakeService::new();
        service.fail_session = true;

        let err = Driver::new(&store, &mut service, Duration::from_secs(60))
            .limit_steps(1)
            .run()
            .unwrap_err();

        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(store.cursor().unwrap(), 0);
        assert_eq!(service.search_calls, 0);
    }

    #[test]
    fn test_rerun_over_resolved_range_is_idempotent() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_track(1, "Artist - Title", 2008, None).unwrap();
        let mut service = FakeService::new().with_match("Artist", "Title", "spotify:track:abc");

        run_steps(&store, &mut service, 1);
        assert_eq!(service.appends.len(), 1);

        // Second pass over the same record: wrap then skip, no new appends.
        let report = run_steps(&store, &mut service, 2);
        assert_eq!(report.wraps, 1);
        assert_eq!(report.already_terminal, 1);
        assert_eq!(service.appends.len(), 1);
    }

    #[test]
    fn test_bucket_year_prefers_earlier_year() {
        let track = Track {
            id: 1,
            name: "A - B".to_string(),
            release_year: 2012,
            first_charted_year: Some(2009),
            spotify_uri: None,
            playlist_id: None,
            unresolved: false,
        };
        assert_eq!(bucket_year(&track), 2009);
    }

    #[test]
    fn test_bucket_year_without_first_charted() {
        let track = Track {
            id: 1,
            name: "A - B".to_string(),
            release_year: 2015,
            first_charted_year: None,
            spotify_uri: None,
            playlist_id: None,
            unresolved: false,
        };
        assert_eq!(bucket_year(&track), 2015);
    }
}
