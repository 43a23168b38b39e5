//! Presence management
//!
//! Tracks which participants currently have a live connection, independent
//! of any call.

pub mod registry;

pub use registry::{ConnectionHandle, PresenceRegistry};
