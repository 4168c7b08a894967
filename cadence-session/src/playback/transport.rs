//! Transport adapter interface
//!
//! Thin capability trait over whatever engine actually renders audio. The
//! session owns exactly one transport and is the only caller of its
//! mutating methods. The engine reports back asynchronously through a
//! `TransportEvent` channel, handed out once via `take_events`.
//!
//! The transport never applies queue policy: it plays the item it was told
//! to and reports `ItemCompleted` when that item ends. Shuffle and repeat
//! decisions stay in the session.

use async_trait::async_trait;
use cadence_common::TrackRef;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Failure categories reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Content locator could not be opened or resolved
    ItemUnavailable,
    /// Content opened but could not be decoded
    Decode,
    /// Output device or engine failure
    Engine,
    /// Call made in a state the engine cannot honor (e.g. after release)
    InvalidState,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::ItemUnavailable => write!(f, "item_unavailable"),
            TransportErrorKind::Decode => write!(f, "decode"),
            TransportErrorKind::Engine => write!(f, "engine"),
            TransportErrorKind::InvalidState => write!(f, "invalid_state"),
        }
    }
}

/// Synchronous failure of a transport call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for crate::error::Error {
    fn from(err: TransportError) -> Self {
        crate::error::Error::Transport {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Asynchronous notifications from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The engine started on item `index` of the loaded list
    ///
    /// Sent once per `load`/`skip_to_index` call, and never on its own.
    ItemTransitioned(usize),
    /// Periodic position report in milliseconds
    PositionTick(u64),
    BufferingChanged(bool),
    /// Audible playback started or stopped, whoever caused it
    PlayingChanged(bool),
    DurationResolved(u64),
    TransportError {
        kind: TransportErrorKind,
        message: String,
    },
    /// Item `index` played to its natural end
    ItemCompleted(usize),
}

/// One consistent reading of the engine clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionSample {
    /// Index (in the loaded list) of the item being played
    pub item_index: Option<usize>,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
}

/// Read-only, cloneable view of the engine clock
///
/// The transport writes whole samples and readers get whole samples, so
/// position, duration and item index are never mixed from two moments.
#[derive(Debug, Clone, Default)]
pub struct PositionProbe {
    sample: Arc<RwLock<PositionSample>>,
}

impl PositionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest sample
    pub fn read(&self) -> PositionSample {
        match self.sample.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replace the sample; only the owning transport calls this
    pub fn store(&self, sample: PositionSample) {
        match self.sample.write() {
            Ok(mut guard) => *guard = sample,
            Err(poisoned) => *poisoned.into_inner() = sample,
        }
    }
}

/// Capability interface over the media engine
#[async_trait]
pub trait Transport: Send + 'static {
    /// Prepare the engine with `items`, positioned at `start_index`
    ///
    /// Does not necessarily start audible playback. After an `Ok` return
    /// the engine owes exactly one `ItemTransitioned(start_index)` before
    /// any other event about the new item. The session discards
    /// buffering, playing and position events that arrive while a
    /// transition is owed. A `TransportError` in that window is taken to
    /// be about the item being loaded and settles the debt.
    async fn load(
        &mut self,
        items: &[TrackRef],
        start_index: usize,
        start_position_ms: u64,
    ) -> Result<(), TransportError>;

    async fn play(&mut self) -> Result<(), TransportError>;

    async fn pause(&mut self) -> Result<(), TransportError>;

    async fn seek(&mut self, position_ms: u64) -> Result<(), TransportError>;

    /// Jump to another item of the currently loaded list
    ///
    /// Same event obligation as `load`: one `ItemTransitioned(index)` (or
    /// a `TransportError`) before anything else about the new item.
    async fn skip_to_index(&mut self, index: usize) -> Result<(), TransportError>;

    /// Unload everything; the engine goes silent
    async fn stop(&mut self) -> Result<(), TransportError>;

    /// Final teardown. No events are produced afterward.
    async fn release(&mut self);

    /// Event receiver, available exactly once
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Clock reader usable outside the session worker
    fn position_probe(&self) -> PositionProbe;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_clones_share_samples() {
        let probe = PositionProbe::new();
        let reader = probe.clone();
        assert_eq!(reader.read(), PositionSample::default());

        probe.store(PositionSample {
            item_index: Some(2),
            position_ms: 1500,
            duration_ms: Some(3000),
        });
        let sample = reader.read();
        assert_eq!(sample.item_index, Some(2));
        assert_eq!(sample.position_ms, 1500);
        assert_eq!(sample.duration_ms, Some(3000));
    }

    #[test]
    fn test_transport_error_converts_to_session_error() {
        let err: crate::error::Error =
            TransportError::new(TransportErrorKind::ItemUnavailable, "404").into();
        assert_eq!(
            err,
            crate::error::Error::Transport {
                kind: TransportErrorKind::ItemUnavailable,
                message: "404".to_string()
            }
        );
    }
}
