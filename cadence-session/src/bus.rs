//! Command bus
//!
//! String-keyed entry point for controllers that cannot hold a typed
//! `Command` (remote controls, notification buttons, the HTTP surface).
//! Actions are decoded into a `Command` exactly once, here; anything that
//! fails to decode never reaches the session.

use cadence_common::TrackRef;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::controller::SessionController;
use crate::error::{Error, Result};
use crate::playback::Command;

/// Argument-free custom action: flip the favorite flag of the current track
pub const TOGGLE_FAVORITE: &str = "toggle_favorite";
/// Argument-free custom action: step the repeat mode
pub const CYCLE_REPEAT: &str = "cycle_repeat";

/// Every action name the bus understands
pub const ACTIONS: &[&str] = &[
    TOGGLE_FAVORITE,
    CYCLE_REPEAT,
    "play_pause",
    "next",
    "previous",
    "seek",
    "shuffle",
    "remove",
    "move",
    "clear",
    "enqueue_next",
    "enqueue_last",
    "play",
];

#[derive(Deserialize)]
struct PlayPayload {
    tracks: Vec<TrackRef>,
    #[serde(default)]
    start_index: i64,
}

#[derive(Deserialize)]
struct TrackPayload {
    track: TrackRef,
}

#[derive(Deserialize)]
struct IndexPayload {
    index: i64,
}

#[derive(Deserialize)]
struct MovePayload {
    from: i64,
    to: i64,
}

#[derive(Deserialize)]
struct SeekPayload {
    position_ms: i64,
}

/// Decodes named actions and forwards them to the session
#[derive(Clone)]
pub struct CommandBus {
    controller: Arc<SessionController>,
}

impl CommandBus {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    /// Decode `action` and run it, waiting for the outcome
    pub async fn dispatch(&self, action: &str, payload: Option<Value>) -> Result<()> {
        let command = Self::decode(action, payload)?;
        debug!("Bus action {} -> {}", action, command);
        self.controller.execute(command).await
    }

    /// Turn an action name and optional JSON payload into a `Command`
    pub fn decode(action: &str, payload: Option<Value>) -> Result<Command> {
        let command = match action {
            TOGGLE_FAVORITE => Command::ToggleFavoriteOfCurrent,
            CYCLE_REPEAT => Command::CycleRepeat,
            "play_pause" => Command::TogglePlayPause,
            "next" => Command::SkipNext,
            "previous" => Command::SkipPrevious,
            "shuffle" => Command::ToggleShuffle,
            "clear" => Command::Clear,
            "seek" => {
                let p: SeekPayload = parse(action, payload)?;
                if p.position_ms < 0 {
                    return Err(Error::InvalidPayload {
                        action: action.to_string(),
                        reason: format!("negative position {}", p.position_ms),
                    });
                }
                Command::SeekTo {
                    position_ms: p.position_ms as u64,
                }
            }
            "remove" => {
                let p: IndexPayload = parse(action, payload)?;
                Command::RemoveAt {
                    index: to_index(p.index)?,
                }
            }
            "move" => {
                let p: MovePayload = parse(action, payload)?;
                Command::MoveTrack {
                    from: to_index(p.from)?,
                    to: to_index(p.to)?,
                }
            }
            "enqueue_next" => Command::EnqueueNext {
                track: parse::<TrackPayload>(action, payload)?.track,
            },
            "enqueue_last" => Command::EnqueueLast {
                track: parse::<TrackPayload>(action, payload)?.track,
            },
            "play" => {
                let p: PlayPayload = parse(action, payload)?;
                // An empty list has no index to violate
                let start_index = if p.tracks.is_empty() {
                    0
                } else {
                    to_index(p.start_index)?
                };
                Command::Play {
                    tracks: p.tracks,
                    start_index,
                }
            }
            other => return Err(Error::UnknownAction(other.to_string())),
        };
        Ok(command)
    }
}

fn parse<T: DeserializeOwned>(action: &str, payload: Option<Value>) -> Result<T> {
    let value = payload.ok_or_else(|| Error::InvalidPayload {
        action: action.to_string(),
        reason: "missing payload".to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| Error::InvalidPayload {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

fn to_index(index: i64) -> Result<usize> {
    usize::try_from(index).map_err(|_| Error::InvalidIndex(index))
}
