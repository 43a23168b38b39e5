//! JSON wire codec
//!
//! Every message travels as
//! `{ callId, type, senderId, receiverId?, payload }` where `payload` depends
//! on `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{IceCandidate, MessageKind, SignalPayload, SignalingMessage, StatusUpdate};
use crate::errors::{CallError, Result};
use crate::types::{CallId, ParticipantId};

/// Wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub call_id: CallId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<ParticipantId>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize, Deserialize)]
struct SdpBody {
    sdp: String,
}

#[derive(Serialize, Deserialize)]
struct ToggleBody {
    enabled: bool,
}

impl WireMessage {
    pub fn from_message(message: &SignalingMessage) -> Result<Self> {
        let payload = match &message.payload {
            SignalPayload::Offer { sdp } | SignalPayload::Answer { sdp } => {
                serde_json::to_value(SdpBody { sdp: sdp.clone() })?
            }
            SignalPayload::IceCandidate(candidate) => serde_json::to_value(candidate)?,
            SignalPayload::ToggleAudio { enabled } | SignalPayload::ToggleVideo { enabled } => {
                serde_json::to_value(ToggleBody { enabled: *enabled })?
            }
            SignalPayload::StatusUpdate(update) => serde_json::to_value(update)?,
            SignalPayload::ScreenShareStart
            | SignalPayload::ScreenShareStop
            | SignalPayload::Join
            | SignalPayload::Leave => Value::Null,
        };

        Ok(Self {
            call_id: message.call_id.clone(),
            kind: message.kind(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            payload,
        })
    }

    pub fn into_message(self) -> Result<SignalingMessage> {
        if self.call_id.as_str().is_empty() {
            return Err(CallError::invalid_message("empty callId"));
        }
        if self.sender_id.as_str().is_empty() {
            return Err(CallError::invalid_message("empty senderId"));
        }
        if self.receiver_id.is_none() && self.kind != MessageKind::StatusUpdate {
            return Err(CallError::invalid_message(format!(
                "{} message without receiverId",
                self.kind
            )));
        }

        let payload = match self.kind {
            MessageKind::Offer => {
                let body: SdpBody = serde_json::from_value(self.payload)?;
                SignalPayload::Offer { sdp: body.sdp }
            }
            MessageKind::Answer => {
                let body: SdpBody = serde_json::from_value(self.payload)?;
                SignalPayload::Answer { sdp: body.sdp }
            }
            MessageKind::IceCandidate => {
                let candidate: IceCandidate = serde_json::from_value(self.payload)?;
                SignalPayload::IceCandidate(candidate)
            }
            MessageKind::ToggleAudio => {
                let body: ToggleBody = serde_json::from_value(self.payload)?;
                SignalPayload::ToggleAudio { enabled: body.enabled }
            }
            MessageKind::ToggleVideo => {
                let body: ToggleBody = serde_json::from_value(self.payload)?;
                SignalPayload::ToggleVideo { enabled: body.enabled }
            }
            MessageKind::StatusUpdate => {
                let update: StatusUpdate = serde_json::from_value(self.payload)?;
                SignalPayload::StatusUpdate(update)
            }
            MessageKind::ScreenShareStart => SignalPayload::ScreenShareStart,
            MessageKind::ScreenShareStop => SignalPayload::ScreenShareStop,
            MessageKind::Join => SignalPayload::Join,
            MessageKind::Leave => SignalPayload::Leave,
        };

        Ok(SignalingMessage {
            call_id: self.call_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            payload,
        })
    }
}

/// Serialize a message to its JSON wire form
pub fn encode(message: &SignalingMessage) -> Result<String> {
    let wire = WireMessage::from_message(message)?;
    Ok(serde_json::to_string(&wire)?)
}

/// Parse and validate a JSON wire message
pub fn decode(text: &str) -> Result<SignalingMessage> {
    let wire: WireMessage = serde_json::from_str(text)?;
    wire.into_message()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_offer() {
        let text = r#"{
            "callId": "call-7",
            "type": "offer",
            "senderId": "buyer-1",
            "receiverId": "seller-1",
            "payload": { "sdp": "v=0\r\n" }
        }"#;
        let msg = decode(text).unwrap();
        assert_eq!(msg.call_id, CallId::from("call-7"));
        assert_eq!(msg.sender_id, ParticipantId::from("buyer-1"));
        assert_eq!(msg.receiver_id, Some(ParticipantId::from("seller-1")));
        assert_eq!(msg.payload, SignalPayload::Offer { sdp: "v=0\r\n".into() });
    }

    #[test]
    fn test_decode_unit_payloads_tolerate_missing_payload() {
        let text = r#"{"callId":"c","type":"screen-share-start","senderId":"a","receiverId":"b"}"#;
        assert_eq!(decode(text).unwrap().payload, SignalPayload::ScreenShareStart);
    }

    #[test]
    fn test_encode_ice_candidate_shape() {
        let msg = SignalingMessage::new(
            "call-1".into(),
            "a".into(),
            "b".into(),
            SignalPayload::IceCandidate(IceCandidate {
                candidate: "candidate:0 1 UDP 2122252543 10.0.0.2 49203 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            }),
        );
        let value: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "callId": "call-1",
                "type": "ice-candidate",
                "senderId": "a",
                "receiverId": "b",
                "payload": {
                    "candidate": "candidate:0 1 UDP 2122252543 10.0.0.2 49203 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            })
        );
    }

    #[test]
    fn test_missing_receiver_rejected_for_peer_messages() {
        let text = r#"{"callId":"c","type":"toggle-audio","senderId":"a","payload":{"enabled":false}}"#;
        assert!(matches!(decode(text), Err(CallError::InvalidMessage(_))));
    }

    #[test]
    fn test_bad_payload_rejected() {
        let text = r#"{"callId":"c","type":"answer","senderId":"a","receiverId":"b","payload":{"spd":"x"}}"#;
        assert!(matches!(decode(text), Err(CallError::InvalidMessage(_))));
        let text = r#"{"callId":"c","type":"hold","senderId":"a","receiverId":"b"}"#;
        assert!(matches!(decode(text), Err(CallError::InvalidMessage(_))));
    }
}
