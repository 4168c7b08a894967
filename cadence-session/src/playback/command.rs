//! Session commands
//!
//! A closed set of requests the playback session accepts. Each command is
//! consumed exactly once by the session worker, in arrival order.

use cadence_common::TrackRef;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::Result;

/// Request to the playback session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Replace the queue and start playing at `start_index`
    Play {
        tracks: Vec<TrackRef>,
        #[serde(default)]
        start_index: usize,
    },
    EnqueueNext {
        track: TrackRef,
    },
    EnqueueLast {
        track: TrackRef,
    },
    RemoveAt {
        index: usize,
    },
    MoveTrack {
        from: usize,
        to: usize,
    },
    Clear,
    TogglePlayPause,
    SkipNext,
    SkipPrevious,
    SeekTo {
        position_ms: u64,
    },
    ToggleShuffle,
    CycleRepeat,
    ToggleFavoriteOfCurrent,
}

impl Command {
    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::EnqueueNext { .. } => "enqueue_next",
            Command::EnqueueLast { .. } => "enqueue_last",
            Command::RemoveAt { .. } => "remove_at",
            Command::MoveTrack { .. } => "move_track",
            Command::Clear => "clear",
            Command::TogglePlayPause => "toggle_play_pause",
            Command::SkipNext => "skip_next",
            Command::SkipPrevious => "skip_previous",
            Command::SeekTo { .. } => "seek_to",
            Command::ToggleShuffle => "toggle_shuffle",
            Command::CycleRepeat => "cycle_repeat",
            Command::ToggleFavoriteOfCurrent => "toggle_favorite_of_current",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Command in flight to the worker, with an optional reply slot
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Result<()>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"type":"remove_at","index":2}"#).unwrap();
        assert_eq!(cmd, Command::RemoveAt { index: 2 });

        let cmd: Command = serde_json::from_str(r#"{"type":"toggle_play_pause"}"#).unwrap();
        assert_eq!(cmd, Command::TogglePlayPause);

        let cmd: Command = serde_json::from_str(
            r#"{"type":"play","tracks":[{"id":"a","name":"A","locator":"file:///a"}]}"#,
        )
        .unwrap();
        match cmd {
            Command::Play {
                tracks,
                start_index,
            } => {
                assert_eq!(tracks.len(), 1);
                assert_eq!(start_index, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let json = serde_json::to_value(Command::SeekTo { position_ms: 1500 }).unwrap();
        assert_eq!(json["type"], "seek_to");
        assert_eq!(json["position_ms"], 1500);
    }

    #[test]
    fn test_negative_index_is_rejected_by_decoder() {
        assert!(serde_json::from_str::<Command>(r#"{"type":"remove_at","index":-1}"#).is_err());
    }
}
