//! Signaling Relay
//!
//! Routes a message to the one connection registered for its receiver. The
//! relay never mutates call state; an undeliverable message is reported to
//! the caller, which decides what it means for the call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::message::SignalingMessage;
use super::transport::SignalTransport;
use crate::errors::{CallError, Result};
use crate::presence::PresenceRegistry;
use crate::session::SessionDirectory;
use crate::types::ParticipantId;

/// Result of one relay attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    ReceiverOffline,
    SessionUnknown,
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::Delivered)
    }
}

/// Relay counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: u64,
    pub receiver_offline: u64,
    pub session_unknown: u64,
}

#[derive(Debug, Default)]
struct RelayCounters {
    delivered: AtomicU64,
    receiver_offline: AtomicU64,
    session_unknown: AtomicU64,
}

pub struct SignalingRelay {
    registry: Arc<PresenceRegistry>,
    directory: Arc<dyn SessionDirectory>,
    transport: Arc<dyn SignalTransport>,
    counters: RelayCounters,
}

impl SignalingRelay {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        directory: Arc<dyn SessionDirectory>,
        transport: Arc<dyn SignalTransport>,
    ) -> Self {
        Self {
            registry,
            directory,
            transport,
            counters: RelayCounters::default(),
        }
    }

    /// Relay a message between the two participants of its call.
    ///
    /// Errors only for malformed routing (no receiver, receiver or sender not
    /// a party of the call). Delivery problems are outcomes, not errors.
    pub async fn relay(&self, message: &SignalingMessage) -> Result<RelayOutcome> {
        let Some((caller, callee)) = self.directory.participants(&message.call_id) else {
            debug!("Dropping {} for unknown call {}", message.kind(), message.call_id);
            self.counters.session_unknown.fetch_add(1, Ordering::Relaxed);
            return Ok(RelayOutcome::SessionUnknown);
        };

        let receiver = message.receiver_id.as_ref().ok_or_else(|| {
            CallError::invalid_message(format!("{} message without receiverId", message.kind()))
        })?;

        let is_party = |p: &ParticipantId| *p == caller || *p == callee;
        if !is_party(receiver) || *receiver == message.sender_id {
            return Err(CallError::invalid_participant(&message.call_id, receiver));
        }
        if !message.is_from_system() && !is_party(&message.sender_id) {
            return Err(CallError::invalid_participant(&message.call_id, &message.sender_id));
        }

        Ok(self.deliver(receiver, message).await)
    }

    /// Deliver to `receiver` without consulting the session directory
    pub async fn deliver(&self, receiver: &ParticipantId, message: &SignalingMessage) -> RelayOutcome {
        let Some(handle) = self.registry.lookup(receiver) else {
            debug!("{} for call {}: {} is offline", message.kind(), message.call_id, receiver);
            self.counters.receiver_offline.fetch_add(1, Ordering::Relaxed);
            return RelayOutcome::ReceiverOffline;
        };

        match self.transport.send(&handle, message).await {
            Ok(()) => {
                debug!(
                    "Relayed {} for call {} from {} to {}",
                    message.kind(),
                    message.call_id,
                    message.sender_id,
                    receiver
                );
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                RelayOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    "Failed to deliver {} for call {} to {} on {}: {}",
                    message.kind(),
                    message.call_id,
                    receiver,
                    handle,
                    e
                );
                self.counters.receiver_offline.fetch_add(1, Ordering::Relaxed);
                RelayOutcome::ReceiverOffline
            }
        }
    }

    /// Send a copy of `message` to each recipient, best-effort
    pub async fn broadcast(
        &self,
        recipients: &[&ParticipantId],
        message: &SignalingMessage,
    ) -> Vec<(ParticipantId, RelayOutcome)> {
        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let addressed = message.clone().addressed_to((*recipient).clone());
            let outcome = self.deliver(recipient, &addressed).await;
            outcomes.push(((*recipient).clone(), outcome));
        }
        outcomes
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            receiver_offline: self.counters.receiver_offline.load(Ordering::Relaxed),
            session_unknown: self.counters.session_unknown.load(Ordering::Relaxed),
        }
    }
}
