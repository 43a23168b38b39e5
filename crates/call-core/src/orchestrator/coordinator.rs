//! Call Orchestrator
//!
//! The single façade through which collaborators start, answer, signal and
//! end calls. Every operation that touches a session takes that session's
//! lock for its whole read-modify-write, including the relay send, so
//! messages from one sender on one call reach the peer in order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Instrument};

use super::events::SessionEvent;
use crate::collaborators::{BlockList, CallRecordSink};
use crate::config::CallConfig;
use crate::errors::{CallError, Result};
use crate::logging::call_span;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::session::{CallSession, CallSessionStore, CallState, NegotiationVerdict, SessionStats};
use crate::signaling::{
    RelayOutcome, RelayStats, SignalPayload, SignalingMessage, SignalingRelay, StatusUpdate,
};
use crate::state_table::{Actor, AppliedTransition, CallEvent, StateMachine};
use crate::types::{CallCategory, CallContext, CallDecision, CallId, CallRole, ParticipantId};

/// Result of `relay_signal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Forwarded to the peer's connection
    Delivered,
    /// Dropped by the offer/answer rules; nothing was sent to the peer.
    ///
    /// The sender is not told by the core either. The transport layer that
    /// submitted the message is expected to forward the verdict to it, so a
    /// `Glare` loser knows to wait for the winning offer and answer it.
    Discarded(NegotiationVerdict),
    /// Peer unreachable; the call has been failed
    Undeliverable,
}

/// Result of `handle_inbound`
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// `join` or `leave`, with the session as it stands afterwards
    Session(CallSession),
    Signal(SignalOutcome),
}

/// Result of one housekeeping pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Ringing calls moved to MISSED
    pub missed: Vec<CallId>,
    /// Accepted calls failed for slow negotiation
    pub failed: Vec<CallId>,
    /// Tombstones forgotten
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.missed.is_empty() && self.failed.is_empty() && self.pruned == 0
    }
}

/// Orchestrator statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub sessions: SessionStats,
    pub online: usize,
    pub relay: RelayStats,
}

pub struct CallOrchestrator {
    config: CallConfig,
    store: Arc<CallSessionStore>,
    registry: Arc<PresenceRegistry>,
    relay: SignalingRelay,
    machine: StateMachine,
    block_list: Arc<dyn BlockList>,
    records: Arc<dyn CallRecordSink>,
    events: broadcast::Sender<SessionEvent>,
}

impl CallOrchestrator {
    pub(crate) fn new(
        config: CallConfig,
        store: Arc<CallSessionStore>,
        registry: Arc<PresenceRegistry>,
        relay: SignalingRelay,
        machine: StateMachine,
        block_list: Arc<dyn BlockList>,
        records: Arc<dyn CallRecordSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            config,
            store,
            registry,
            relay,
            machine,
            block_list,
            records,
            events,
        }
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ---- connections ----------------------------------------------------

    /// Register a participant's connection. Returns the superseded handle, if
    /// any; closing it is up to the transport layer.
    pub fn connect(&self, participant: &ParticipantId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        info!("Participant {} connected on {}", participant, handle);
        self.registry.register(participant, handle)
    }

    /// A connection closed.
    ///
    /// Ignored when `handle` has already been superseded. Otherwise the
    /// participant goes offline and their live call, if any, is wound down:
    /// an active call ends, a caller dropping before media is up ends the
    /// call, a callee dropping before media is up fails it.
    pub async fn disconnect(
        &self,
        participant: &ParticipantId,
        handle: &ConnectionHandle,
    ) -> Result<Option<CallSession>> {
        if !self.registry.unregister_if_current(participant, handle) {
            debug!("Ignoring close of superseded connection {} for {}", handle, participant);
            return Ok(None);
        }
        info!("Participant {} disconnected", participant);

        let Some(call_id) = self.store.live_call_for(participant) else {
            return Ok(None);
        };
        self.wind_down(&call_id, participant)
            .instrument(call_span("disconnect", &call_id, Some(participant)))
            .await
    }

    async fn wind_down(&self, call_id: &CallId, participant: &ParticipantId) -> Result<Option<CallSession>> {
        let Ok(slot) = self.store.get(call_id) else {
            return Ok(None);
        };

        let mut session = slot.lock().await;
        if session.state.is_terminal() {
            return Ok(None);
        }
        let role = session.ensure_participant(participant)?;
        session.mark_left(participant);

        let (event, actor) = match (session.state, role) {
            (CallState::Active, _) => (CallEvent::PeerDisconnect, Actor::Participant(participant.clone())),
            (_, CallRole::Caller) => (CallEvent::End, Actor::Participant(participant.clone())),
            (_, CallRole::Callee) => (CallEvent::PeerUnreachable, Actor::System),
        };
        self.apply(&mut session, event, &actor, Utc::now()).await?;
        Ok(Some(session.clone()))
    }

    // ---- call lifecycle -------------------------------------------------

    /// Start a call from `caller_id` to `callee_id`.
    ///
    /// Returns the session in `RINGING`, or already `FAILED` when the callee
    /// could not be reached with the announcement.
    pub async fn initiate(
        &self,
        caller_id: ParticipantId,
        callee_id: ParticipantId,
        context: CallContext,
        category: CallCategory,
    ) -> Result<CallSession> {
        let call_id = CallId::new();
        let span = call_span("initiate", &call_id, Some(&caller_id));
        self.start_call(call_id, caller_id, callee_id, context, category)
            .instrument(span)
            .await
    }

    async fn start_call(
        &self,
        call_id: CallId,
        caller_id: ParticipantId,
        callee_id: ParticipantId,
        context: CallContext,
        category: CallCategory,
    ) -> Result<CallSession> {
        let now = Utc::now();

        if caller_id == callee_id {
            return Err(CallError::invalid_participant(&call_id, &callee_id));
        }
        if let Some(reserved) = [&caller_id, &callee_id].into_iter().find(|p| p.is_reserved()) {
            return Err(CallError::invalid_participant(&call_id, reserved));
        }
        if self.block_list.is_blocked(&caller_id, &callee_id).await {
            info!("Call from {} to {} blocked", caller_id, callee_id);
            return Err(CallError::Blocked {
                caller: caller_id,
                callee: callee_id,
            });
        }

        let session = CallSession::new(call_id.clone(), caller_id, callee_id, context, category, now);
        let slot = match self.store.admit(session.clone()) {
            Ok(slot) => slot,
            Err(CallError::Busy { participant, call_id }) => {
                self.record_busy_attempt(session, &participant, now);
                return Err(CallError::Busy { participant, call_id });
            }
            Err(e) => return Err(e),
        };

        let mut session = slot.lock().await;
        if session.state.is_terminal() {
            // Wound down by a disconnect before we got the lock
            return Ok(session.clone());
        }
        info!(
            "Call {} ringing: {} -> {} ({:?})",
            call_id, session.caller_id, session.callee_id, session.category
        );

        let announcement = SignalingMessage::status(call_id.clone(), StatusUpdate::from_session(&session, now))
            .addressed_to(session.callee_id.clone());
        // The slot is admitted from here on: every path must leave it ringing
        // or finalized
        match self.relay.relay(&announcement).await {
            Ok(RelayOutcome::Delivered) => {
                let ringing = announcement.addressed_to(session.caller_id.clone());
                self.relay.deliver(&session.caller_id, &ringing).await;
            }
            Ok(outcome) => {
                warn!("Call {}: callee {} unreachable ({:?})", call_id, session.callee_id, outcome);
                self.apply(&mut session, CallEvent::CalleeOffline, &Actor::System, now).await?;
            }
            Err(e) => {
                warn!("Call {}: announcement to {} rejected: {}", call_id, session.callee_id, e);
                self.apply(&mut session, CallEvent::CalleeOffline, &Actor::System, now).await?;
            }
        }

        Ok(session.clone())
    }

    /// Callee accepts or declines a ringing call
    pub async fn respond(
        &self,
        call_id: &CallId,
        responder: &ParticipantId,
        decision: CallDecision,
    ) -> Result<CallSession> {
        self.answer(call_id, responder, decision)
            .instrument(call_span("respond", call_id, Some(responder)))
            .await
    }

    async fn answer(
        &self,
        call_id: &CallId,
        responder: &ParticipantId,
        decision: CallDecision,
    ) -> Result<CallSession> {
        let slot = self.store.get(call_id)?;
        let mut session = slot.lock().await;
        session.ensure_live()?;
        if *responder != session.callee_id {
            return Err(CallError::invalid_participant(call_id, responder));
        }

        let event = match decision {
            CallDecision::Accept => CallEvent::Accept,
            CallDecision::Decline => CallEvent::Decline,
        };
        self.apply(&mut session, event, &Actor::Participant(responder.clone()), Utc::now())
            .await?;
        Ok(session.clone())
    }

    /// Forward a negotiation or media-control message to the sender's peer
    pub async fn relay_signal(
        &self,
        call_id: &CallId,
        sender: &ParticipantId,
        payload: SignalPayload,
    ) -> Result<SignalOutcome> {
        self.relay_signal_to(call_id, sender, None, payload).await
    }

    async fn relay_signal_to(
        &self,
        call_id: &CallId,
        sender: &ParticipantId,
        receiver: Option<&ParticipantId>,
        payload: SignalPayload,
    ) -> Result<SignalOutcome> {
        let span = call_span("signal", call_id, Some(sender));
        self.forward_signal(call_id, sender, receiver, payload)
            .instrument(span)
            .await
    }

    async fn forward_signal(
        &self,
        call_id: &CallId,
        sender: &ParticipantId,
        receiver: Option<&ParticipantId>,
        payload: SignalPayload,
    ) -> Result<SignalOutcome> {
        if !payload.is_relayable() {
            return Err(CallError::invalid_message(format!(
                "{} cannot be relayed peer to peer",
                payload.kind()
            )));
        }

        let slot = self.store.get(call_id)?;
        let mut session = slot.lock().await;
        session.ensure_live()?;
        session.ensure_participant(sender)?;

        let peer = match session.peer_of(sender) {
            Some(peer) => peer.clone(),
            None => return Err(CallError::invalid_participant(call_id, sender)),
        };
        if let Some(receiver) = receiver {
            if *receiver != peer {
                return Err(CallError::invalid_participant(call_id, receiver));
            }
        }
        if session.state == CallState::Ringing {
            return Err(CallError::invalid_state(
                call_id,
                format!("{} before the call was accepted", payload.kind()),
            ));
        }

        let verdict = match &payload {
            SignalPayload::Offer { .. } => Some(session.negotiation.observe_offer(sender)),
            SignalPayload::Answer { .. } => Some(session.negotiation.observe_answer(sender)),
            _ => None,
        };
        if let Some(verdict) = verdict.filter(|v| !v.should_forward()) {
            warn!(
                "Call {}: discarding {} from {} ({:?})",
                call_id,
                payload.kind(),
                sender,
                verdict
            );
            return Ok(SignalOutcome::Discarded(verdict));
        }

        let message = SignalingMessage::new(call_id.clone(), sender.clone(), peer, payload);
        match self.relay.relay(&message).await? {
            RelayOutcome::Delivered => {
                if verdict == Some(NegotiationVerdict::AnswerCloses)
                    && self.machine.allows(session.state, CallEvent::NegotiationComplete)
                {
                    self.apply(&mut session, CallEvent::NegotiationComplete, &Actor::System, Utc::now())
                        .await?;
                }
                Ok(SignalOutcome::Delivered)
            }
            RelayOutcome::ReceiverOffline | RelayOutcome::SessionUnknown => {
                warn!("Call {}: {} undeliverable, failing call", call_id, message.kind());
                self.apply(&mut session, CallEvent::PeerUnreachable, &Actor::System, Utc::now())
                    .await?;
                Ok(SignalOutcome::Undeliverable)
            }
        }
    }

    /// Participant joins the media-negotiation room
    pub async fn join(&self, call_id: &CallId, participant: &ParticipantId) -> Result<CallSession> {
        self.enter_room(call_id, participant)
            .instrument(call_span("join", call_id, Some(participant)))
            .await
    }

    async fn enter_room(&self, call_id: &CallId, participant: &ParticipantId) -> Result<CallSession> {
        let slot = self.store.get(call_id)?;
        let mut session = slot.lock().await;
        session.ensure_live()?;
        session.ensure_participant(participant)?;

        if session.mark_joined(participant) {
            debug!(
                "{} joined call {} ({} in room)",
                participant,
                call_id,
                session.participant_count()
            );
            self.notify_peer(&session, participant, SignalPayload::Join).await;
        }
        Ok(session.clone())
    }

    /// Participant leaves the room. Leaving an active call ends it.
    pub async fn leave(&self, call_id: &CallId, participant: &ParticipantId) -> Result<CallSession> {
        self.exit_room(call_id, participant)
            .instrument(call_span("leave", call_id, Some(participant)))
            .await
    }

    async fn exit_room(&self, call_id: &CallId, participant: &ParticipantId) -> Result<CallSession> {
        let slot = self.store.get(call_id)?;
        let mut session = slot.lock().await;
        session.ensure_live()?;
        session.ensure_participant(participant)?;

        if session.mark_left(participant) {
            debug!("{} left call {}", participant, call_id);
            self.notify_peer(&session, participant, SignalPayload::Leave).await;
        }
        if session.state == CallState::Active {
            self.apply(
                &mut session,
                CallEvent::PeerDisconnect,
                &Actor::Participant(participant.clone()),
                Utc::now(),
            )
            .await?;
        }
        Ok(session.clone())
    }

    /// Either participant hangs up, from any live state
    pub async fn end(&self, call_id: &CallId, requester: &ParticipantId) -> Result<CallSession> {
        self.hang_up(call_id, requester)
            .instrument(call_span("end", call_id, Some(requester)))
            .await
    }

    async fn hang_up(&self, call_id: &CallId, requester: &ParticipantId) -> Result<CallSession> {
        let slot = self.store.get(call_id)?;
        let mut session = slot.lock().await;
        session.ensure_live()?;
        session.ensure_participant(requester)?;

        self.apply(&mut session, CallEvent::End, &Actor::Participant(requester.clone()), Utc::now())
            .await?;
        Ok(session.clone())
    }

    /// Entry point for client-originated wire messages
    pub async fn handle_inbound(&self, message: SignalingMessage) -> Result<InboundOutcome> {
        if message.is_from_system() {
            return Err(CallError::invalid_message("system sender on inbound message"));
        }

        let SignalingMessage {
            call_id,
            sender_id,
            receiver_id,
            payload,
        } = message;

        match payload {
            SignalPayload::Join => Ok(InboundOutcome::Session(self.join(&call_id, &sender_id).await?)),
            SignalPayload::Leave => Ok(InboundOutcome::Session(self.leave(&call_id, &sender_id).await?)),
            SignalPayload::StatusUpdate(_) => Err(CallError::invalid_message(
                "status-update is only sent by the server",
            )),
            payload => {
                let outcome = self
                    .relay_signal_to(&call_id, &sender_id, receiver_id.as_ref(), payload)
                    .await?;
                Ok(InboundOutcome::Signal(outcome))
            }
        }
    }

    // ---- timers ---------------------------------------------------------

    /// Move every call ringing longer than the ring timeout to MISSED
    pub async fn expire_stale_ringing(&self) -> Vec<CallId> {
        self.expire_stale_ringing_at(Utc::now()).await
    }

    pub async fn expire_stale_ringing_at(&self, now: DateTime<Utc>) -> Vec<CallId> {
        let window = to_chrono(self.config.ring_timeout());
        self.expire_where(now, CallState::Ringing, CallEvent::RingTimeout, |s| {
            now - s.created_at >= window
        })
        .await
    }

    /// Fail every accepted call that has not finished negotiating in time
    pub async fn expire_stale_negotiations(&self) -> Vec<CallId> {
        self.expire_stale_negotiations_at(Utc::now()).await
    }

    pub async fn expire_stale_negotiations_at(&self, now: DateTime<Utc>) -> Vec<CallId> {
        let window = to_chrono(self.config.negotiation_timeout());
        self.expire_where(now, CallState::Accepted, CallEvent::NegotiationTimeout, |s| {
            now - s.responded_at.unwrap_or(s.created_at) >= window
        })
        .await
    }

    async fn expire_where<F>(
        &self,
        now: DateTime<Utc>,
        state: CallState,
        event: CallEvent,
        is_stale: F,
    ) -> Vec<CallId>
    where
        F: Fn(&CallSession) -> bool,
    {
        let mut expired = Vec::new();
        for slot in self.store.live_slots() {
            let mut session = slot.lock().await;
            if session.state != state || !is_stale(&*session) {
                continue;
            }
            let span = call_span("expire", &session.call_id, None);
            match self.apply(&mut session, event, &Actor::System, now).instrument(span).await {
                Ok(_) => expired.push(session.call_id.clone()),
                Err(e) => warn!("Failed to expire call {}: {}", session.call_id, e),
            }
        }
        if !expired.is_empty() {
            info!("Expired {} {} call(s) with {:?}", expired.len(), state, event);
        }
        expired
    }

    /// One housekeeping pass: both timeouts and tombstone pruning
    pub async fn run_sweep(&self) -> SweepReport {
        self.run_sweep_at(Utc::now()).await
    }

    pub async fn run_sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let missed = self.expire_stale_ringing_at(now).await;
        let failed = self.expire_stale_negotiations_at(now).await;
        let pruned = self
            .store
            .prune_tombstones(now, to_chrono(self.config.tombstone_ttl()));
        SweepReport { missed, failed, pruned }
    }

    // ---- queries --------------------------------------------------------

    /// Snapshot of a live call
    pub async fn get_call(&self, call_id: &CallId) -> Result<CallSession> {
        let slot = self.store.get(call_id)?;
        let session = slot.lock().await;
        Ok(session.clone())
    }

    pub fn live_call_for(&self, participant: &ParticipantId) -> Option<CallId> {
        self.store.live_call_for(participant)
    }

    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            sessions: self.store.stats().await,
            online: self.registry.online_count(),
            relay: self.relay.stats(),
        }
    }

    // ---- internals ------------------------------------------------------

    /// Apply a transition to a locked session, report it and finalize the
    /// call if it reached a terminal state
    async fn apply(
        &self,
        session: &mut CallSession,
        event: CallEvent,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<AppliedTransition> {
        let applied = self.machine.apply(session, event, actor, now)?;
        info!(
            "Call {}: {} -> {} on {:?}",
            session.call_id, applied.old_state, applied.new_state, event
        );

        let _ = self.events.send(SessionEvent::StateChanged {
            call_id: session.call_id.clone(),
            old_state: applied.old_state,
            new_state: applied.new_state,
            event,
        });

        let update = SignalingMessage::status(session.call_id.clone(), StatusUpdate::from_session(session, now));
        self.relay.broadcast(&session.participants(), &update).await;

        if applied.is_terminal() {
            self.finalize(session);
        }
        Ok(applied)
    }

    /// Drop a terminal session from the store and hand it to the record sink.
    /// Runs under the session lock, so it happens once per call.
    fn finalize(&self, session: &CallSession) {
        if !self.store.finalize(session) {
            return;
        }
        let _ = self.events.send(SessionEvent::CallFinalized {
            call_id: session.call_id.clone(),
            state: session.state,
            duration_seconds: session.duration_seconds(),
        });
        self.persist(session.clone());
    }

    fn record_busy_attempt(&self, attempt: CallSession, busy: &ParticipantId, now: DateTime<Utc>) {
        info!(
            "Call {} from {} to {} rejected: {} is busy",
            attempt.call_id, attempt.caller_id, attempt.callee_id, busy
        );
        let record = CallSession::busy_attempt(
            attempt.call_id,
            attempt.caller_id,
            attempt.callee_id,
            attempt.context,
            attempt.category,
            now,
        );
        let _ = self.events.send(SessionEvent::BusyAttempt {
            call_id: record.call_id.clone(),
            busy_participant: busy.clone(),
        });
        self.persist(record);
    }

    fn persist(&self, record: CallSession) {
        let records = self.records.clone();
        tokio::spawn(async move {
            let call_id = record.call_id.clone();
            if let Err(e) = records.save(record).await {
                error!("Failed to save call {}: {}", call_id, e);
            }
        });
    }

    async fn notify_peer(&self, session: &CallSession, from: &ParticipantId, payload: SignalPayload) {
        if let Some(peer) = session.peer_of(from) {
            let notice = SignalingMessage::new(session.call_id.clone(), from.clone(), peer.clone(), payload);
            self.relay.deliver(peer, &notice).await;
        }
    }
}

fn to_chrono(window: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
