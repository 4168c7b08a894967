//! HTTP remote control
//!
//! Out-of-process controllers reach the session through these routes. Every
//! request goes through the same `SessionController` and `CommandBus` an
//! in-process caller would use.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
