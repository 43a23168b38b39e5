//! # CallHub Call Core - real-time call signaling and session state
//!
//! Lets a buyer and a seller set up a live audio/video call through the
//! marketplace. The crate tracks every call's lifecycle, relays media
//! negotiation messages between exactly the two participants, and fails
//! calls deterministically when a party disappears. Media, authentication
//! and persistence are left to collaborators.
//!
//! ## Components
//!
//! - [`presence`]: participant identity to live connection handle
//! - [`session`]: the `CallSession` record and the store that owns live calls
//! - [`state_table`]: the lifecycle as an explicit `(state, event)` table
//! - [`signaling`]: message model, JSON wire codec, transport seam and relay
//! - [`orchestrator`]: the façade collaborators call, plus sweeper and events
//! - [`logging`]: subscriber setup and the per-call span every operation runs in
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use callhub_call_core::prelude::*;
//!
//! # async fn example() -> callhub_call_core::Result<()> {
//! let config = CallConfig::from_env()?;
//! callhub_call_core::logging::setup_logging(&config.logging)?;
//!
//! let transport = Arc::new(ChannelTransport::new());
//! let orchestrator = CallOrchestratorBuilder::new()
//!     .with_config(config)
//!     .with_transport(transport.clone())
//!     .build()?;
//! let _sweeper = spawn_sweeper(&orchestrator);
//!
//! let (buyer_conn, _buyer_rx) = transport.open();
//! let (seller_conn, _seller_rx) = transport.open();
//! orchestrator.connect(&"buyer-1".into(), buyer_conn);
//! orchestrator.connect(&"seller-7".into(), seller_conn);
//!
//! let call = orchestrator
//!     .initiate(
//!         "buyer-1".into(),
//!         "seller-7".into(),
//!         CallContext::for_order("order-42"),
//!         CallCategory::OrderInquiry,
//!     )
//!     .await?;
//! orchestrator
//!     .respond(&call.call_id, &"seller-7".into(), CallDecision::Accept)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod state_table;
pub mod types;

pub use collaborators::{BlockList, CallRecordSink, InMemoryCallRecords, NoBlocking, StaticBlockList};
pub use config::CallConfig;
pub use errors::{CallError, Result};
pub use orchestrator::{
    spawn_sweeper, CallOrchestrator, CallOrchestratorBuilder, InboundOutcome, SessionEvent,
    SignalOutcome, SweepReport,
};
pub use presence::{ConnectionHandle, PresenceRegistry};
pub use session::{CallSession, CallState, EndReason};
pub use signaling::{ChannelTransport, SignalPayload, SignalTransport, SignalingMessage};
pub use types::{CallCategory, CallContext, CallDecision, CallId, CallRole, ParticipantId};

/// Common imports for hosting the call core
pub mod prelude {
    pub use crate::collaborators::{BlockList, CallRecordSink, InMemoryCallRecords, NoBlocking};
    pub use crate::config::CallConfig;
    pub use crate::errors::{CallError, Result};
    pub use crate::orchestrator::{
        spawn_sweeper, CallOrchestrator, CallOrchestratorBuilder, SessionEvent, SignalOutcome,
    };
    pub use crate::presence::ConnectionHandle;
    pub use crate::session::{CallSession, CallState};
    pub use crate::signaling::{ChannelTransport, IceCandidate, SignalPayload, SignalingMessage};
    pub use crate::types::{CallCategory, CallContext, CallDecision, CallId, ParticipantId};
}
