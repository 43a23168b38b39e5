//! Signaling message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{CallSession, CallState, EndReason};
use crate::types::{CallCategory, CallContext, CallId, ParticipantId};

/// Sender id used for messages originated by the core itself
pub const SYSTEM_SENDER: &str = "system";

/// Wire `type` tag of a signaling message
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Offer,
    Answer,
    IceCandidate,
    ToggleAudio,
    ToggleVideo,
    ScreenShareStart,
    ScreenShareStop,
    Join,
    Leave,
    StatusUpdate,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::IceCandidate => "ice-candidate",
            MessageKind::ToggleAudio => "toggle-audio",
            MessageKind::ToggleVideo => "toggle-video",
            MessageKind::ScreenShareStart => "screen-share-start",
            MessageKind::ScreenShareStop => "screen-share-stop",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::StatusUpdate => "status-update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trickled ICE candidate, passed through untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// State report sent to participants after every transition. The first
/// one a callee sees (state `RINGING`) doubles as the call announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub state: CallState,
    pub caller_id: ParticipantId,
    pub callee_id: ParticipantId,
    pub category: CallCategory,
    pub context: CallContext,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

impl StatusUpdate {
    pub fn from_session(session: &CallSession, at: DateTime<Utc>) -> Self {
        Self {
            state: session.state,
            caller_id: session.caller_id.clone(),
            callee_id: session.callee_id.clone(),
            category: session.category.clone(),
            context: session.context.clone(),
            at,
            end_reason: session.end_reason.clone(),
        }
    }
}

/// Type-specific message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate(IceCandidate),
    ToggleAudio { enabled: bool },
    ToggleVideo { enabled: bool },
    ScreenShareStart,
    ScreenShareStop,
    Join,
    Leave,
    StatusUpdate(StatusUpdate),
}

impl SignalPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            SignalPayload::Offer { .. } => MessageKind::Offer,
            SignalPayload::Answer { .. } => MessageKind::Answer,
            SignalPayload::IceCandidate(_) => MessageKind::IceCandidate,
            SignalPayload::ToggleAudio { .. } => MessageKind::ToggleAudio,
            SignalPayload::ToggleVideo { .. } => MessageKind::ToggleVideo,
            SignalPayload::ScreenShareStart => MessageKind::ScreenShareStart,
            SignalPayload::ScreenShareStop => MessageKind::ScreenShareStop,
            SignalPayload::Join => MessageKind::Join,
            SignalPayload::Leave => MessageKind::Leave,
            SignalPayload::StatusUpdate(_) => MessageKind::StatusUpdate,
        }
    }

    /// Offer or answer: exactly-once per direction per round
    pub fn is_negotiation(&self) -> bool {
        matches!(self, SignalPayload::Offer { .. } | SignalPayload::Answer { .. })
    }

    /// Messages that are safe to apply more than once or out of order
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            SignalPayload::IceCandidate(_)
                | SignalPayload::ToggleAudio { .. }
                | SignalPayload::ToggleVideo { .. }
                | SignalPayload::ScreenShareStart
                | SignalPayload::ScreenShareStop
        )
    }

    /// Payloads forwarded peer to peer through the relay
    pub fn is_relayable(&self) -> bool {
        self.is_negotiation() || self.is_idempotent()
    }
}

/// A routed signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    pub call_id: CallId,
    pub sender_id: ParticipantId,
    /// Absent only on broadcast-style status updates
    pub receiver_id: Option<ParticipantId>,
    pub payload: SignalPayload,
}

impl SignalingMessage {
    pub fn new(
        call_id: CallId,
        sender_id: ParticipantId,
        receiver_id: ParticipantId,
        payload: SignalPayload,
    ) -> Self {
        Self {
            call_id,
            sender_id,
            receiver_id: Some(receiver_id),
            payload,
        }
    }

    /// Status update from the core, receiver filled in per recipient
    pub fn status(call_id: CallId, update: StatusUpdate) -> Self {
        Self {
            call_id,
            sender_id: ParticipantId::from(SYSTEM_SENDER),
            receiver_id: None,
            payload: SignalPayload::StatusUpdate(update),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn is_from_system(&self) -> bool {
        self.sender_id.as_str() == SYSTEM_SENDER
    }

    pub fn addressed_to(mut self, receiver: ParticipantId) -> Self {
        self.receiver_id = Some(receiver);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_classes() {
        let offer = SignalPayload::Offer { sdp: "v=0".into() };
        assert!(offer.is_negotiation());
        assert!(!offer.is_idempotent());
        assert!(offer.is_relayable());

        let ice = SignalPayload::IceCandidate(IceCandidate::new("candidate:1 1 udp"));
        assert!(ice.is_idempotent());
        assert!(ice.is_relayable());

        assert!(!SignalPayload::Join.is_relayable());
        assert!(!SignalPayload::Leave.is_relayable());
    }

    #[test]
    fn test_status_is_system_originated() {
        let session = CallSession::new(
            CallId::from("call-1"),
            "a".into(),
            "b".into(),
            CallContext::default(),
            CallCategory::GeneralSupport,
            Utc::now(),
        );
        let msg = SignalingMessage::status(
            session.call_id.clone(),
            StatusUpdate::from_session(&session, Utc::now()),
        );
        assert!(msg.is_from_system());
        assert_eq!(msg.kind(), MessageKind::StatusUpdate);
        assert_eq!(msg.receiver_id, None);
        let addressed = msg.addressed_to("b".into());
        assert_eq!(addressed.receiver_id, Some(ParticipantId::from("b")));
    }
}
