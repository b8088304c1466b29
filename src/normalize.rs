//! Track name sanitization and artist/title extraction.
//!
//! Catalog names arrive as a single `"Artist - Title"` string, sometimes
//! with embedded newlines, tabs or NUL bytes, and sometimes with fields
//! redacted to runs of question marks. Everything here is pure and
//! idempotent: normalizing twice yields the same result as normalizing once.

use once_cell::sync::Lazy;
use regex::Regex;

/// Separator between artist and title in raw catalog names. Only the first
/// occurrence splits; later dashes belong to the title.
const FIELD_SEPARATOR: &str = " - ";

/// A field consisting entirely of question marks is a redaction placeholder,
/// not a name.
static PLACEHOLDER_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\?+$").unwrap());

/// A raw catalog name with whitespace runs collapsed and NUL bytes stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackName(String);

impl TrackName {
    pub fn new(raw: &str) -> Self {
        let sanitized = raw
            .replace('\0', "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        TrackName(sanitized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(artist, title)` on the first `" - "`.
    /// `None` when the separator is absent.
    pub fn split_fields(&self) -> Option<(&str, &str)> {
        self.0.split_once(FIELD_SEPARATOR)
    }

    /// The usable `(artist, title)` pair, or `None` when the name can never
    /// match: no separator, or either field empty or placeholder-only.
    pub fn artist_and_title(&self) -> Option<(&str, &str)> {
        let (artist, title) = self.split_fields()?;
        if field_is_missing(artist) || field_is_missing(title) {
            return None;
        }
        Some((artist, title))
    }

    /// True when this record should be permanently marked unresolved
    /// instead of queried.
    pub fn is_unresolvable(&self) -> bool {
        self.artist_and_title().is_none()
    }
}

fn field_is_missing(field: &str) -> bool {
    field.is_empty() || PLACEHOLDER_FIELD.is_match(field)
}
