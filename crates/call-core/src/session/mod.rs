//! Call sessions and the store that owns them while they are live.

pub mod call;
pub mod store;

pub use call::{CallSession, CallState, EndReason, NegotiationRound, NegotiationVerdict};
pub use store::{CallSessionStore, SessionDirectory, SessionSlot, SessionStats};
