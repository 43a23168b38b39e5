use serde::Serialize;

use crate::session::CallState;
use crate::state_table::CallEvent;
use crate::types::{CallId, ParticipantId};

/// Published on the orchestrator's broadcast channel.
///
/// Observers that fall behind lose events (`RecvError::Lagged`); the
/// session store stays the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    StateChanged {
        call_id: CallId,
        old_state: CallState,
        new_state: CallState,
        event: CallEvent,
    },
    CallFinalized {
        call_id: CallId,
        state: CallState,
        duration_seconds: Option<i64>,
    },
    /// A new call was rejected because a participant is occupied
    BusyAttempt {
        call_id: CallId,
        busy_participant: ParticipantId,
    },
}

impl SessionEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            SessionEvent::StateChanged { call_id, .. }
            | SessionEvent::CallFinalized { call_id, .. }
            | SessionEvent::BusyAttempt { call_id, .. } => call_id,
        }
    }
}
