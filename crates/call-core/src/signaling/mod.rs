//! Signaling: message model, wire codec, transport seam and relay.

pub mod message;
pub mod relay;
pub mod transport;
pub mod wire;

pub use message::{
    IceCandidate, MessageKind, SignalPayload, SignalingMessage, StatusUpdate, SYSTEM_SENDER,
};
pub use relay::{RelayOutcome, RelayStats, SignalingRelay};
pub use transport::{ChannelTransport, SignalTransport};
pub use wire::{decode, encode, WireMessage};
