//! Track references
//!
//! A `TrackRef` is an immutable descriptor of a playable item. Sessions never
//! edit one in place; updated metadata (e.g. the favorite flag coming back
//! from the catalog) produces a new value via `with_favorite`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable track identifier, unique across all sources
///
/// Sources use different id schemes (server item ids, file paths, search
/// result keys), so this is an opaque string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Immutable descriptor of a playable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    /// Globally unique identifier
    pub id: TrackId,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub artist: String,

    #[serde(default)]
    pub album: String,

    /// Playable content locator (file path, stream URL, ...)
    ///
    /// Must already be resolvable when the track enters a queue.
    pub locator: String,

    /// Artwork locator (optional)
    #[serde(default)]
    pub artwork: Option<String>,

    /// Duration in milliseconds, unknown until resolved
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Favorite flag as last reported by the catalog
    #[serde(default)]
    pub favorite: bool,
}

impl TrackRef {
    /// Minimal constructor; metadata fields can be filled with the builder methods
    pub fn new(id: impl Into<TrackId>, name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artist: String::new(),
            album: String::new(),
            locator: locator.into(),
            artwork: None,
            duration_ms: None,
            favorite: false,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Copy of this track with the favorite flag replaced
    pub fn with_favorite(&self, favorite: bool) -> Self {
        Self {
            favorite,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_favorite_leaves_original_untouched() {
        let track = TrackRef::new("a", "Alpha", "file:///a.flac").with_duration_ms(1000);
        let fav = track.with_favorite(true);

        assert!(!track.favorite);
        assert!(fav.favorite);
        assert_eq!(fav.id, track.id);
        assert_eq!(fav.duration_ms, Some(1000));
    }

    #[test]
    fn test_track_id_serializes_as_plain_string() {
        let track = TrackRef::new("jf:1234", "Song", "https://example/stream/1234");
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["id"], "jf:1234");

        // Optional metadata may be omitted on the wire
        let parsed: TrackRef =
            serde_json::from_str(r#"{"id":"x","name":"X","locator":"file:///x.mp3"}"#).unwrap();
        assert_eq!(parsed.id.as_str(), "x");
        assert!(parsed.duration_ms.is_none());
        assert!(!parsed.favorite);
    }
}
