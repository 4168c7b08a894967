//! # Cadence Common Library
//!
//! Shared code for the cadence playback session:
//! - Track references (`TrackRef`, `TrackId`)
//! - Playback snapshot value types
//! - Session event types and the broadcast `EventBus`
//! - Configuration loading (TOML + defaults)

pub mod config;
pub mod error;
pub mod events;
pub mod snapshot;
pub mod track;

pub use error::{Error, Result};
pub use snapshot::{PlaybackSnapshot, RepeatMode, TransportStatus};
pub use track::{TrackId, TrackRef};
