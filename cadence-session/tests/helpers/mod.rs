//! Test helper modules for cadence-session integration tests
//!
//! Provides reusable test infrastructure components:
//! - TestSession: session on a simulated transport with a connected controller
//! - ScriptedSession: session on a transport whose events the test emits
//! - Track fixtures and snapshot wait helpers

#![allow(dead_code)]

pub mod harness;
pub mod scripted;

#[allow(unused_imports)]
pub use harness::{fast_simulator, ids, track, tracks, wait_for, TestSession};
#[allow(unused_imports)]
pub use scripted::{EngineScript, ScriptedSession, ScriptedTransport};
