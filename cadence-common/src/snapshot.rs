//! Playback snapshot value types
//!
//! A `PlaybackSnapshot` is the single externally visible state of a playback
//! session. It is published wholesale after every state-affecting event and
//! never mutated after publication.

use crate::track::TrackRef;
use serde::{Deserialize, Serialize};

/// Transport status state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    /// No track loaded
    #[default]
    Idle,
    /// Track set, transport buffering or waiting to start
    Loading,
    Playing,
    Paused,
    /// Queue exhausted with repeat off
    Ended,
    /// Last transport operation failed
    Error,
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Idle => write!(f, "idle"),
            TransportStatus::Loading => write!(f, "loading"),
            TransportStatus::Playing => write!(f, "playing"),
            TransportStatus::Paused => write!(f, "paused"),
            TransportStatus::Ended => write!(f, "ended"),
            TransportStatus::Error => write!(f, "error"),
        }
    }
}

/// Queue repeat policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    /// Next mode in the cycle off -> all -> one -> off
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::All => write!(f, "all"),
            RepeatMode::One => write!(f, "one"),
        }
    }
}

/// Composite, immutable playback state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlaybackSnapshot {
    /// Publish counter, strictly increasing within one session
    pub revision: u64,

    /// Track under the queue cursor (None when the queue is empty)
    pub current_track: Option<TrackRef>,

    pub status: TransportStatus,

    /// Position in the current track, bounded by `duration_ms` when known
    pub position_ms: u64,

    /// Duration of the current track, None until resolved
    pub duration_ms: Option<u64>,

    /// Queue contents in array order
    pub queue: Vec<TrackRef>,

    /// Index of `current_track` within `queue`
    pub cursor: Option<usize>,

    pub shuffle_enabled: bool,

    pub repeat_mode: RepeatMode,

    /// Favorite flag of the current track
    pub favorite: bool,

    /// Message of the transport error that put the session into `Error`
    pub last_error: Option<String>,
}

impl PlaybackSnapshot {
    /// Empty snapshot published when a session starts
    pub fn initial() -> Self {
        Self::default()
    }

    /// True when audio is (or is about to be) audible
    pub fn is_playing(&self) -> bool {
        self.status == TransportStatus::Playing
    }

    /// Id of the current track, for log lines and lookups
    pub fn current_id(&self) -> Option<&str> {
        self.current_track.as_ref().map(|t| t.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_cycle_visits_every_mode() {
        let mut mode = RepeatMode::Off;
        mode = mode.cycled();
        assert_eq!(mode, RepeatMode::All);
        mode = mode.cycled();
        assert_eq!(mode, RepeatMode::One);
        mode = mode.cycled();
        assert_eq!(mode, RepeatMode::Off);
    }

    #[test]
    fn test_initial_snapshot_is_idle_and_empty() {
        let snap = PlaybackSnapshot::initial();
        assert_eq!(snap.status, TransportStatus::Idle);
        assert!(snap.current_track.is_none());
        assert!(snap.cursor.is_none());
        assert!(snap.queue.is_empty());
        assert_eq!(snap.revision, 0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TransportStatus::Playing).unwrap();
        assert_eq!(json, "\"playing\"");
        assert_eq!(TransportStatus::Ended.to_string(), "ended");
    }
}
