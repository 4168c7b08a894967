//! # Cadence Playback Session
//!
//! Playback session and queue engine:
//! - Queue model with shuffle and repeat policy
//! - Single-writer session worker owning the media transport
//! - Snapshot publication with replay-1 semantics
//! - Session controller, command bus and lifecycle supervisor
//! - HTTP remote control (REST + SSE)

pub mod api;
pub mod bus;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod playback;

pub use bus::CommandBus;
pub use controller::{endpoint, EndpointPublisher, SessionController, SessionEndpoint, SnapshotSubscription};
pub use error::{Error, Result};
pub use lifecycle::{teardown_authorized, HostSignal, LifecycleSupervisor};
pub use playback::{Command, PlaybackSession, SessionBuilder, SessionLink};
