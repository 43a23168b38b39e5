//! Call State Machine
//!
//! The lifecycle of a call is a single explicit table keyed by
//! `(state, event)`. Every legal transition is listed here; anything not
//! listed is rejected by the executor.
//!
//! ```text
//! [RINGING] --accept(callee)--> ACCEPTED --negotiationComplete--> ACTIVE --end--> ENDED
//! [RINGING] --decline(callee)--> DECLINED
//! [RINGING] --ringTimeout--> MISSED
//! [RINGING] --calleeOffline--> FAILED
//! [RINGING] --end(participant)--> ENDED
//! ACCEPTED  --negotiationTimeout--> FAILED
//! ACCEPTED  --end(participant)--> ENDED
//! ACTIVE    --peerDisconnect--> ENDED
//! RINGING | ACCEPTED | ACTIVE --peerUnreachable--> FAILED
//! ```
//!
//! `BUSY` is never reached through the table: it only labels a new call
//! attempt rejected because a participant is occupied.

pub mod executor;
pub mod types;

pub use executor::{AppliedTransition, StateMachine};
pub use types::*;

use lazy_static::lazy_static;
use std::sync::Arc;

use crate::session::CallState;

lazy_static! {
    /// The master state table - single source of truth for all transitions
    pub static ref MASTER_TABLE: Arc<MasterStateTable> = Arc::new(build_master_table());
}

/// Build the complete master state table
pub fn build_master_table() -> MasterStateTable {
    use CallEvent::*;
    use CallState::*;

    let mut table = MasterStateTable::new();

    // Ringing
    table.insert(
        Ringing,
        Accept,
        Transition::to(Accepted)
            .guarded(Guard::CalleeOnly)
            .stamping(Stamp::RespondedAt),
    );
    table.insert(
        Ringing,
        Decline,
        Transition::to(Declined)
            .guarded(Guard::CalleeOnly)
            .stamping(Stamp::RespondedAt)
            .stamping(Stamp::EndedAt),
    );
    table.insert(
        Ringing,
        RingTimeout,
        Transition::to(Missed)
            .guarded(Guard::SystemOnly)
            .stamping(Stamp::EndedAt),
    );
    table.insert(
        Ringing,
        CalleeOffline,
        Transition::to(Failed)
            .guarded(Guard::SystemOnly)
            .stamping(Stamp::EndedAt),
    );

    // Accepted
    table.insert(
        Accepted,
        NegotiationComplete,
        Transition::to(Active)
            .guarded(Guard::SystemOnly)
            .stamping(Stamp::StartedAt),
    );
    table.insert(
        Accepted,
        NegotiationTimeout,
        Transition::to(Failed)
            .guarded(Guard::SystemOnly)
            .stamping(Stamp::EndedAt),
    );

    // Active
    table.insert(
        Active,
        PeerDisconnect,
        Transition::to(Ended)
            .guarded(Guard::ParticipantOnly)
            .stamping(Stamp::EndedAt),
    );

    // Shared by every live state
    for state in [Ringing, Accepted, Active] {
        table.insert(
            state,
            End,
            Transition::to(Ended)
                .guarded(Guard::ParticipantOnly)
                .stamping(Stamp::EndedAt),
        );
        table.insert(
            state,
            PeerUnreachable,
            Transition::to(Failed)
                .guarded(Guard::SystemOnly)
                .stamping(Stamp::EndedAt),
        );
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_table_is_valid() {
        let table = &*MASTER_TABLE;
        assert_eq!(table.validate(), Ok(()));
        assert_eq!(table.transition_count(), 13);
    }

    #[test]
    fn test_happy_path_is_listed() {
        let table = &*MASTER_TABLE;
        let accept = table
            .get(&StateKey { state: CallState::Ringing, event: CallEvent::Accept })
            .expect("Should have accept transition");
        assert_eq!(accept.next_state, CallState::Accepted);
        assert!(accept.guards.contains(&Guard::CalleeOnly));

        let complete = table
            .get(&StateKey { state: CallState::Accepted, event: CallEvent::NegotiationComplete })
            .expect("Should have negotiation transition");
        assert_eq!(complete.next_state, CallState::Active);
        assert!(complete.stamps.contains(&Stamp::StartedAt));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let table = &*MASTER_TABLE;
        for state in CallState::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(table.events_from(state).is_empty(), "{} should be final", state);
        }
    }

    #[test]
    fn test_validate_catches_bad_table() {
        let mut table = MasterStateTable::new();
        table.insert(CallState::Ended, CallEvent::Accept, Transition::to(CallState::Active));
        table.insert(CallState::Ringing, CallEvent::Decline, Transition::to(CallState::Busy));
        let errors = table.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Terminal state ENDED")));
        assert!(errors.iter().any(|e| e.contains("BUSY")));
    }
}
