//! Call Session Implementation
//!
//! The single authoritative record of a call. State changes go through the
//! state table (`crate::state_table`); this module only owns the data and
//! the bookkeeping that does not change `state`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::{CallError, Result};
use crate::types::{CallCategory, CallContext, CallId, CallRole, ParticipantId};

/// Lifecycle state of a call
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Ringing,
    Accepted,
    Active,
    Declined,
    Busy,
    Missed,
    Ended,
    Failed,
}

impl CallState {
    pub const ALL: [CallState; 8] = [
        CallState::Ringing,
        CallState::Accepted,
        CallState::Active,
        CallState::Declined,
        CallState::Busy,
        CallState::Missed,
        CallState::Ended,
        CallState::Failed,
    ];

    /// Ringing, accepted or active: the call still occupies its participants
    pub fn is_live(&self) -> bool {
        matches!(self, CallState::Ringing | CallState::Accepted | CallState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "RINGING",
            CallState::Accepted => "ACCEPTED",
            CallState::Active => "ACTIVE",
            CallState::Declined => "DECLINED",
            CallState::Busy => "BUSY",
            CallState::Missed => "MISSED",
            CallState::Ended => "ENDED",
            CallState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call reached its terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum EndReason {
    Declined,
    Busy,
    Missed,
    CalleeOffline,
    NegotiationTimeout,
    HungUp { by: ParticipantId },
    PeerDisconnected { by: ParticipantId },
    Unreachable,
}

/// Outcome of observing an offer or answer within the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationVerdict {
    /// First offer of the round, forward it
    OfferOpened,
    /// Answer to the pending offer, forward it and close the round
    AnswerCloses,
    /// Same sender already offered in this round
    DuplicateOffer,
    /// The other side already has an offer pending
    Glare,
    /// Answer with nothing to answer
    NoPendingOffer,
    /// Offerer tried to answer its own offer
    AnswerFromOfferer,
}

impl NegotiationVerdict {
    pub fn should_forward(&self) -> bool {
        matches!(self, NegotiationVerdict::OfferOpened | NegotiationVerdict::AnswerCloses)
    }
}

/// Offer/answer bookkeeping. Offers and answers are exactly-once per
/// direction inside one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationRound {
    offerer: Option<ParticipantId>,
    completed_rounds: u32,
}

impl NegotiationRound {
    pub fn observe_offer(&mut self, sender: &ParticipantId) -> NegotiationVerdict {
        match &self.offerer {
            None => {
                self.offerer = Some(sender.clone());
                NegotiationVerdict::OfferOpened
            }
            Some(offerer) if offerer == sender => NegotiationVerdict::DuplicateOffer,
            Some(_) => NegotiationVerdict::Glare,
        }
    }

    pub fn observe_answer(&mut self, sender: &ParticipantId) -> NegotiationVerdict {
        match &self.offerer {
            None => NegotiationVerdict::NoPendingOffer,
            Some(offerer) if offerer == sender => NegotiationVerdict::AnswerFromOfferer,
            Some(_) => {
                self.offerer = None;
                self.completed_rounds += 1;
                NegotiationVerdict::AnswerCloses
            }
        }
    }

    pub fn pending_offerer(&self) -> Option<&ParticipantId> {
        self.offerer.as_ref()
    }

    pub fn completed_rounds(&self) -> u32 {
        self.completed_rounds
    }
}

/// The central call record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub call_id: CallId,
    pub caller_id: ParticipantId,
    pub callee_id: ParticipantId,
    pub state: CallState,
    pub context: CallContext,
    pub category: CallCategory,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    /// Connections currently joined to the media-negotiation room
    pub joined: BTreeSet<ParticipantId>,
    #[serde(skip)]
    pub negotiation: NegotiationRound,
}

impl CallSession {
    /// Create a ringing session
    pub fn new(
        call_id: CallId,
        caller_id: ParticipantId,
        callee_id: ParticipantId,
        context: CallContext,
        category: CallCategory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            caller_id,
            callee_id,
            state: CallState::Ringing,
            context,
            category,
            created_at: now,
            responded_at: None,
            started_at: None,
            ended_at: None,
            end_reason: None,
            joined: BTreeSet::new(),
            negotiation: NegotiationRound::default(),
        }
    }

    /// Record of a call attempt rejected because a participant was occupied.
    /// Never enters the live store.
    pub fn busy_attempt(
        call_id: CallId,
        caller_id: ParticipantId,
        callee_id: ParticipantId,
        context: CallContext,
        category: CallCategory,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::new(call_id, caller_id, callee_id, context, category, now);
        session.state = CallState::Busy;
        session.ended_at = Some(now);
        session.end_reason = Some(EndReason::Busy);
        session
    }

    pub fn role_of(&self, participant: &ParticipantId) -> Option<CallRole> {
        if *participant == self.caller_id {
            Some(CallRole::Caller)
        } else if *participant == self.callee_id {
            Some(CallRole::Callee)
        } else {
            None
        }
    }

    pub fn is_participant(&self, participant: &ParticipantId) -> bool {
        self.role_of(participant).is_some()
    }

    /// The other party of the call, if `participant` is a party at all
    pub fn peer_of(&self, participant: &ParticipantId) -> Option<&ParticipantId> {
        match self.role_of(participant)? {
            CallRole::Caller => Some(&self.callee_id),
            CallRole::Callee => Some(&self.caller_id),
        }
    }

    pub fn participants(&self) -> [&ParticipantId; 2] {
        [&self.caller_id, &self.callee_id]
    }

    pub fn participant_count(&self) -> usize {
        self.joined.len()
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.duration().map(|d| d.num_seconds())
    }

    /// Fails with `SessionTerminal` once the call is over
    pub fn ensure_live(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(CallError::SessionTerminal {
                call_id: self.call_id.clone(),
                state: self.state,
            });
        }
        Ok(())
    }

    /// Fails with `InvalidParticipant` unless `participant` is caller or callee
    pub fn ensure_participant(&self, participant: &ParticipantId) -> Result<CallRole> {
        self.role_of(participant)
            .ok_or_else(|| CallError::invalid_participant(&self.call_id, participant))
    }

    /// Returns true if the participant was not already joined
    pub fn mark_joined(&mut self, participant: &ParticipantId) -> bool {
        self.joined.insert(participant.clone())
    }

    /// Returns true if the participant was joined
    pub fn mark_left(&mut self, participant: &ParticipantId) -> bool {
        self.joined.remove(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ringing() -> CallSession {
        CallSession::new(
            CallId::from("call-1"),
            ParticipantId::from("buyer"),
            ParticipantId::from("seller"),
            CallContext::for_order("order-9").with_note("where is my parcel"),
            CallCategory::OrderInquiry,
            Utc::now(),
        )
    }

    #[test]
    fn test_roles_are_fixed() {
        let session = ringing();
        assert_eq!(session.role_of(&"buyer".into()), Some(CallRole::Caller));
        assert_eq!(session.role_of(&"seller".into()), Some(CallRole::Callee));
        assert_eq!(session.role_of(&"stranger".into()), None);
        assert_eq!(session.peer_of(&"buyer".into()), Some(&ParticipantId::from("seller")));
        assert!(session.ensure_participant(&"stranger".into()).is_err());
    }

    #[test]
    fn test_duration_requires_both_stamps() {
        let mut session = ringing();
        assert_eq!(session.duration(), None);
        let start = Utc::now();
        session.started_at = Some(start);
        assert_eq!(session.duration(), None);
        session.ended_at = Some(start + Duration::seconds(42));
        assert_eq!(session.duration_seconds(), Some(42));
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut session = ringing();
        assert!(session.mark_joined(&"buyer".into()));
        assert!(!session.mark_joined(&"buyer".into()));
        assert!(session.mark_joined(&"seller".into()));
        assert_eq!(session.participant_count(), 2);
        assert!(session.mark_left(&"seller".into()));
        assert!(!session.mark_left(&"seller".into()));
        assert_eq!(session.participant_count(), 1);
    }

    #[test]
    fn test_negotiation_round_rules() {
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        let mut round = NegotiationRound::default();

        assert_eq!(round.observe_answer(&b), NegotiationVerdict::NoPendingOffer);
        assert_eq!(round.observe_offer(&a), NegotiationVerdict::OfferOpened);
        assert_eq!(round.observe_offer(&a), NegotiationVerdict::DuplicateOffer);
        assert_eq!(round.observe_offer(&b), NegotiationVerdict::Glare);
        assert_eq!(round.observe_answer(&a), NegotiationVerdict::AnswerFromOfferer);
        assert_eq!(round.observe_answer(&b), NegotiationVerdict::AnswerCloses);
        assert_eq!(round.completed_rounds(), 1);
        assert!(round.pending_offerer().is_none());

        // renegotiation opens a fresh round
        assert_eq!(round.observe_offer(&b), NegotiationVerdict::OfferOpened);
    }

    #[test]
    fn test_busy_attempt_is_terminal() {
        let session = CallSession::busy_attempt(
            CallId::new(),
            "a".into(),
            "b".into(),
            CallContext::default(),
            CallCategory::GeneralSupport,
            Utc::now(),
        );
        assert_eq!(session.state, CallState::Busy);
        assert!(session.state.is_terminal());
        assert!(session.ensure_live().is_err());
    }
}
