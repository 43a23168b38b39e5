use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::types::{Actor, CallEvent, Guard, MasterStateTable, Stamp, StateKey};
use super::MASTER_TABLE;
use crate::errors::{CallError, Result};
use crate::session::{CallSession, CallState};

/// Result of applying an event to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub old_state: CallState,
    pub new_state: CallState,
    pub event: CallEvent,
}

impl AppliedTransition {
    pub fn is_terminal(&self) -> bool {
        self.new_state.is_terminal()
    }
}

/// Applies table transitions to sessions. Holds no session state itself.
#[derive(Debug, Clone)]
pub struct StateMachine {
    table: Arc<MasterStateTable>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(MASTER_TABLE.clone())
    }
}

impl StateMachine {
    pub fn new(table: Arc<MasterStateTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MasterStateTable {
        &self.table
    }

    /// Whether `event` would be accepted by the table in `state`, ignoring guards
    pub fn allows(&self, state: CallState, event: CallEvent) -> bool {
        self.table.has_transition(&StateKey { state, event })
    }

    /// Apply `event` on behalf of `actor`.
    ///
    /// Checks, in order: the session is not terminal, a transition exists,
    /// and every guard passes. On any failure the session is left untouched.
    pub fn apply(
        &self,
        session: &mut CallSession,
        event: CallEvent,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<AppliedTransition> {
        session.ensure_live()?;

        let key = StateKey {
            state: session.state,
            event,
        };
        let transition = self.table.get(&key).ok_or_else(|| {
            CallError::invalid_state(
                &session.call_id,
                format!("{:?} not allowed in {}", event, session.state),
            )
        })?;

        for guard in &transition.guards {
            check_guard(*guard, session, actor)?;
        }

        let old_state = session.state;
        session.state = transition.next_state;
        for stamp in &transition.stamps {
            match stamp {
                Stamp::RespondedAt => session.responded_at = Some(now),
                Stamp::StartedAt => session.started_at = Some(now),
                Stamp::EndedAt => session.ended_at = Some(now),
            }
        }
        if session.state.is_terminal() {
            session.end_reason = event.end_reason(actor);
        }

        debug!(
            "Call {} {:?}: {} -> {}",
            session.call_id, event, old_state, session.state
        );

        Ok(AppliedTransition {
            old_state,
            new_state: session.state,
            event,
        })
    }
}

fn check_guard(guard: Guard, session: &CallSession, actor: &Actor) -> Result<()> {
    let ok = match (guard, actor) {
        (Guard::SystemOnly, Actor::System) => true,
        (Guard::SystemOnly, Actor::Participant(_)) => false,
        (Guard::CalleeOnly, Actor::Participant(p)) => *p == session.callee_id,
        (Guard::ParticipantOnly, Actor::Participant(p)) => session.is_participant(p),
        (Guard::CalleeOnly | Guard::ParticipantOnly, Actor::System) => false,
    };

    if ok {
        return Ok(());
    }

    match actor {
        Actor::Participant(p) => Err(CallError::invalid_participant(&session.call_id, p)),
        Actor::System => Err(CallError::invalid_state(
            &session.call_id,
            format!("{:?} requires a participant", guard),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EndReason;
    use crate::types::{CallCategory, CallContext, CallId, ParticipantId};

    fn ringing() -> CallSession {
        CallSession::new(
            CallId::new(),
            ParticipantId::from("alice"),
            ParticipantId::from("bob"),
            CallContext::default(),
            CallCategory::GeneralSupport,
            Utc::now(),
        )
    }

    fn who(p: &str) -> Actor {
        Actor::Participant(ParticipantId::from(p))
    }

    #[test]
    fn test_accept_stamps_response() {
        let machine = StateMachine::default();
        let mut session = ringing();
        let now = Utc::now();

        let applied = machine.apply(&mut session, CallEvent::Accept, &who("bob"), now).unwrap();
        assert_eq!(applied.old_state, CallState::Ringing);
        assert_eq!(applied.new_state, CallState::Accepted);
        assert_eq!(session.responded_at, Some(now));
        assert_eq!(session.started_at, None);
    }

    #[test]
    fn test_caller_cannot_decline() {
        let machine = StateMachine::default();
        let mut session = ringing();
        let before = session.clone();

        let err = machine
            .apply(&mut session, CallEvent::Decline, &who("alice"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidParticipant { .. }));
        assert_eq!(session, before);
    }

    #[test]
    fn test_participant_cannot_fake_system_events() {
        let machine = StateMachine::default();
        let mut session = ringing();
        machine.apply(&mut session, CallEvent::Accept, &who("bob"), Utc::now()).unwrap();

        let err = machine
            .apply(&mut session, CallEvent::NegotiationComplete, &who("alice"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidParticipant { .. }));
        assert_eq!(session.state, CallState::Accepted);
    }

    #[test]
    fn test_terminal_is_final() {
        let machine = StateMachine::default();
        let mut session = ringing();
        machine.apply(&mut session, CallEvent::RingTimeout, &Actor::System, Utc::now()).unwrap();
        assert_eq!(session.state, CallState::Missed);
        assert_eq!(session.end_reason, Some(EndReason::Missed));

        for event in CallEvent::ALL {
            let err = machine.apply(&mut session, event, &Actor::System, Utc::now()).unwrap_err();
            assert!(matches!(err, CallError::SessionTerminal { .. }), "{:?}", event);
        }
    }

    #[test]
    fn test_transition_applies_once() {
        let machine = StateMachine::default();
        let mut session = ringing();
        machine.apply(&mut session, CallEvent::Accept, &who("bob"), Utc::now()).unwrap();
        let err = machine
            .apply(&mut session, CallEvent::Accept, &who("bob"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));
    }

    #[test]
    fn test_hangup_records_who() {
        let machine = StateMachine::default();
        let mut session = ringing();
        machine.apply(&mut session, CallEvent::End, &who("alice"), Utc::now()).unwrap();
        assert_eq!(session.state, CallState::Ended);
        assert_eq!(
            session.end_reason,
            Some(EndReason::HungUp { by: ParticipantId::from("alice") })
        );
    }
}
