//! Session Orchestrator
//!
//! Coordinates presence, the session store, the state machine and the relay
//! behind one API, and runs the periodic sweeps.

pub mod builder;
pub mod coordinator;
pub mod events;
pub mod sweeper;

pub use builder::CallOrchestratorBuilder;
pub use coordinator::{CallOrchestrator, InboundOutcome, OrchestratorStats, SignalOutcome, SweepReport};
pub use events::SessionEvent;
pub use sweeper::spawn_sweeper;
