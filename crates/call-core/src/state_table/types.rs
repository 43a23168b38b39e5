use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::session::{CallState, EndReason};
use crate::types::ParticipantId;

/// Events that drive a call through its lifecycle
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallEvent {
    /// Callee picks up
    Accept,
    /// Callee refuses
    Decline,
    /// No response within the ring window
    RingTimeout,
    /// Callee could not be reached with the announcement
    CalleeOffline,
    /// Offer and matching answer have both been relayed
    NegotiationComplete,
    /// Accepted call did not finish negotiating in time
    NegotiationTimeout,
    /// A participant hangs up
    End,
    /// A participant left an active call
    PeerDisconnect,
    /// A signal could not be delivered, or the callee dropped before media was up
    PeerUnreachable,
}

impl CallEvent {
    pub const ALL: [CallEvent; 9] = [
        CallEvent::Accept,
        CallEvent::Decline,
        CallEvent::RingTimeout,
        CallEvent::CalleeOffline,
        CallEvent::NegotiationComplete,
        CallEvent::NegotiationTimeout,
        CallEvent::End,
        CallEvent::PeerDisconnect,
        CallEvent::PeerUnreachable,
    ];

    /// End reason recorded when this event terminates a call
    pub fn end_reason(&self, actor: &Actor) -> Option<EndReason> {
        let by = match actor {
            Actor::Participant(p) => Some(p.clone()),
            Actor::System => None,
        };
        match self {
            CallEvent::Decline => Some(EndReason::Declined),
            CallEvent::RingTimeout => Some(EndReason::Missed),
            CallEvent::CalleeOffline => Some(EndReason::CalleeOffline),
            CallEvent::NegotiationTimeout => Some(EndReason::NegotiationTimeout),
            CallEvent::PeerUnreachable => Some(EndReason::Unreachable),
            CallEvent::End => by.map(|by| EndReason::HungUp { by }),
            CallEvent::PeerDisconnect => by.map(|by| EndReason::PeerDisconnected { by }),
            CallEvent::Accept | CallEvent::NegotiationComplete => None,
        }
    }
}

/// Who is applying an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Participant(ParticipantId),
    /// Timers, relay observations and other internal triggers
    System,
}

/// Conditions that must hold for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Guard {
    /// Actor must be the session's callee
    CalleeOnly,
    /// Actor must be caller or callee
    ParticipantOnly,
    /// Only the core itself may trigger this
    SystemOnly,
}

/// Timestamp fields a transition stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stamp {
    RespondedAt,
    StartedAt,
    EndedAt,
}

/// Key for looking up transitions in the state table
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateKey {
    pub state: CallState,
    pub event: CallEvent,
}

/// What happens when an event occurs in a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub guards: Vec<Guard>,
    pub next_state: CallState,
    pub stamps: Vec<Stamp>,
}

impl Transition {
    pub fn to(next_state: CallState) -> Self {
        Self {
            guards: Vec::new(),
            next_state,
            stamps: Vec::new(),
        }
    }

    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn stamping(mut self, stamp: Stamp) -> Self {
        self.stamps.push(stamp);
        self
    }
}

/// Master state table containing all transitions
#[derive(Debug, Default)]
pub struct MasterStateTable {
    transitions: HashMap<StateKey, Transition>,
}

impl MasterStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: CallState, event: CallEvent, transition: Transition) {
        self.transitions.insert(StateKey { state, event }, transition);
    }

    pub fn get(&self, key: &StateKey) -> Option<&Transition> {
        self.transitions.get(key)
    }

    pub fn has_transition(&self, key: &StateKey) -> bool {
        self.transitions.contains_key(key)
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Events accepted in `state`
    pub fn events_from(&self, state: CallState) -> Vec<CallEvent> {
        self.transitions
            .keys()
            .filter(|key| key.state == state)
            .map(|key| key.event)
            .collect()
    }

    pub fn collect_used_states(&self) -> HashSet<CallState> {
        let mut states = HashSet::new();
        for (key, transition) in &self.transitions {
            states.insert(key.state);
            states.insert(transition.next_state);
        }
        states
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for state in self.collect_used_states() {
            let has_exit = self.transitions.keys().any(|k| k.state == state);
            if state.is_terminal() && has_exit {
                errors.push(format!("Terminal state {} has exit transitions", state));
            }
            if state.is_live() && !has_exit {
                errors.push(format!("Live state {} has no exit transitions", state));
            }
        }

        for (key, transition) in &self.transitions {
            if transition.next_state == CallState::Busy {
                errors.push(format!("{:?} moves an existing call to BUSY", key));
            }
            if transition.next_state.is_terminal() && !transition.stamps.contains(&Stamp::EndedAt) {
                errors.push(format!("{:?} terminates without stamping endedAt", key));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
