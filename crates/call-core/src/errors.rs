//! Error Types for Call Core
//!
//! Every orchestration operation returns one of these as a typed result.
//! Timeouts are not errors: they surface as asynchronous state transitions.

use thiserror::Error;

use crate::session::CallState;
use crate::types::{CallId, ParticipantId};

/// Main result type for call operations
pub type Result<T> = std::result::Result<T, CallError>;

/// Main error type for call operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Target participant already has a live call
    #[error("Participant {participant} is busy (attempt {call_id})")]
    Busy {
        participant: ParticipantId,
        call_id: CallId,
    },

    /// The block-list collaborator vetoed the pair
    #[error("Call from {caller} to {callee} is blocked")]
    Blocked {
        caller: ParticipantId,
        callee: ParticipantId,
    },

    /// Operation against a finished session
    #[error("Call {call_id} already finished in state {state}")]
    SessionTerminal { call_id: CallId, state: CallState },

    /// Actor is not allowed to perform this operation on the session
    #[error("Participant {participant} may not act on call {call_id}")]
    InvalidParticipant {
        call_id: CallId,
        participant: ParticipantId,
    },

    /// Call id was never created or has been forgotten
    #[error("Call not found: {0}")]
    SessionUnknown(CallId),

    /// Operation is not legal in the session's current (non-terminal) state
    #[error("Invalid state for call {call_id}: {detail}")]
    InvalidState { call_id: CallId, detail: String },

    /// Malformed or disallowed signaling message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failed to hand a message to a connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Record sink refused or failed to store a finished call
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl CallError {
    pub fn invalid_state(call_id: &CallId, detail: impl Into<String>) -> Self {
        CallError::InvalidState {
            call_id: call_id.clone(),
            detail: detail.into(),
        }
    }

    pub fn invalid_participant(call_id: &CallId, participant: &ParticipantId) -> Self {
        CallError::InvalidParticipant {
            call_id: call_id.clone(),
            participant: participant.clone(),
        }
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        CallError::InvalidMessage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CallError::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        CallError::Transport(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        CallError::Persistence(msg.into())
    }

    /// Whether the caller may reasonably retry the same operation later.
    /// An unreachable receiver is not an error: it fails the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Busy { .. })
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::InvalidMessage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let call_id = CallId::new();
        let busy = CallError::Busy {
            participant: ParticipantId::from("seller-1"),
            call_id: call_id.clone(),
        };
        assert!(busy.is_retryable());
        assert!(!CallError::persistence("disk full").is_retryable());
        assert!(!CallError::SessionUnknown(call_id.clone()).is_retryable());
        assert!(!CallError::invalid_participant(&call_id, &ParticipantId::from("x")).is_retryable());
    }

    #[test]
    fn test_display_mentions_ids() {
        let call_id = CallId::from("call-42");
        let err = CallError::SessionTerminal {
            call_id,
            state: CallState::Ended,
        };
        assert_eq!(err.to_string(), "Call call-42 already finished in state ENDED");
    }
}
