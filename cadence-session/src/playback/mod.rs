//! Playback subsystem
//!
//! The queue model, the transport and catalog seams, and the session worker
//! that ties them together.

pub mod catalog;
pub mod command;
pub mod queue;
pub mod session;
pub mod simulated;
pub mod transport;

pub use catalog::{Catalog, CatalogError, MemoryCatalog};
pub use command::Command;
pub use queue::{Direction, QueueModel, Removal};
pub use session::{PlaybackSession, SessionBuilder, SessionLink};
pub use simulated::{SimulatedTransport, SimulatorConfig, SimulatorControl, TransportCall};
pub use transport::{
    PositionProbe, PositionSample, Transport, TransportError, TransportErrorKind, TransportEvent,
};
