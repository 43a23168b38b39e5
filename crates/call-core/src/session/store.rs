//! Call Session Store
//!
//! Live sessions are held one-per-slot behind their own async mutex so that
//! mutations of a single call are serialized while different calls proceed
//! in parallel. Occupancy ("one live call per participant") is indexed per
//! identity. Finalized calls leave a tombstone behind for a while so stale
//! clients get `SessionTerminal` rather than `SessionUnknown`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::call::{CallSession, CallState};
use crate::errors::{CallError, Result};
use crate::types::{CallId, ParticipantId};

/// Read-only view of which participants belong to a call. Used by the relay,
/// which must never take a session lock.
pub trait SessionDirectory: Send + Sync {
    fn participants(&self, call_id: &CallId) -> Option<(ParticipantId, ParticipantId)>;
}

/// One live session. Participants are immutable, so they sit outside the lock.
#[derive(Debug)]
pub struct SessionSlot {
    pub call_id: CallId,
    pub caller_id: ParticipantId,
    pub callee_id: ParticipantId,
    session: Mutex<CallSession>,
}

impl SessionSlot {
    fn new(session: CallSession) -> Self {
        Self {
            call_id: session.call_id.clone(),
            caller_id: session.caller_id.clone(),
            callee_id: session.callee_id.clone(),
            session: Mutex::new(session),
        }
    }

    /// Lock the session for a serialized read-modify-write
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, CallSession> {
        self.session.lock().await
    }

    pub fn involves(&self, participant: &ParticipantId) -> bool {
        self.caller_id == *participant || self.callee_id == *participant
    }
}

#[derive(Debug, Clone)]
struct Tombstone {
    state: CallState,
    finalized_at: DateTime<Utc>,
}

/// Session statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub live: usize,
    pub ringing: usize,
    pub accepted: usize,
    pub active: usize,
    pub tombstones: usize,
    pub total_created: u64,
    pub total_finalized: u64,
}

/// Authoritative in-memory record of every live call
#[derive(Debug, Default)]
pub struct CallSessionStore {
    sessions: DashMap<CallId, Arc<SessionSlot>>,
    /// participant -> the live call occupying them
    occupancy: DashMap<ParticipantId, CallId>,
    tombstones: DashMap<CallId, Tombstone>,
    total_created: AtomicU64,
    total_finalized: AtomicU64,
}

impl CallSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new ringing session, reserving both participants.
    ///
    /// Fails with `Busy` naming the first participant that is already
    /// occupied; in that case nothing is reserved or stored.
    ///
    /// The slot is stored before either reservation, so a participant's
    /// occupancy always resolves through `get`.
    pub fn admit(&self, session: CallSession) -> Result<Arc<SessionSlot>> {
        let call_id = session.call_id.clone();
        let slot = Arc::new(SessionSlot::new(session));
        self.sessions.insert(call_id.clone(), slot.clone());

        if let Err(err) = self.reserve(&slot.caller_id, &call_id) {
            self.sessions.remove(&call_id);
            return Err(err);
        }
        if let Err(err) = self.reserve(&slot.callee_id, &call_id) {
            self.release(&slot.caller_id, &call_id);
            self.sessions.remove(&call_id);
            return Err(err);
        }

        self.total_created.fetch_add(1, Ordering::Relaxed);
        debug!("Admitted call {} ({} -> {})", call_id, slot.caller_id, slot.callee_id);
        Ok(slot)
    }

    fn reserve(&self, participant: &ParticipantId, call_id: &CallId) -> Result<()> {
        match self.occupancy.entry(participant.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    "Participant {} busy with {}, rejecting {}",
                    participant,
                    existing.get(),
                    call_id
                );
                Err(CallError::Busy {
                    participant: participant.clone(),
                    call_id: call_id.clone(),
                })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(call_id.clone());
                Ok(())
            }
        }
    }

    fn release(&self, participant: &ParticipantId, call_id: &CallId) {
        self.occupancy.remove_if(participant, |_, occupying| occupying == call_id);
    }

    /// Look up a live session.
    ///
    /// Finalized-but-remembered calls yield `SessionTerminal`, anything else
    /// `SessionUnknown`.
    pub fn get(&self, call_id: &CallId) -> Result<Arc<SessionSlot>> {
        if let Some(slot) = self.sessions.get(call_id) {
            return Ok(slot.value().clone());
        }
        match self.tombstones.get(call_id) {
            Some(tomb) => Err(CallError::SessionTerminal {
                call_id: call_id.clone(),
                state: tomb.state,
            }),
            None => Err(CallError::SessionUnknown(call_id.clone())),
        }
    }

    /// Drop a session that just reached a terminal state.
    ///
    /// Must be called while holding the slot's lock so no other operation
    /// observes the session between the transition and the removal.
    /// Returns false if the call was already finalized.
    pub fn finalize(&self, session: &CallSession) -> bool {
        if self.sessions.remove(&session.call_id).is_none() {
            return false;
        }
        for participant in session.participants() {
            self.release(participant, &session.call_id);
        }
        self.tombstones.insert(
            session.call_id.clone(),
            Tombstone {
                state: session.state,
                finalized_at: session.ended_at.unwrap_or_else(Utc::now),
            },
        );
        self.total_finalized.fetch_add(1, Ordering::Relaxed);
        info!("Finalized call {} in state {}", session.call_id, session.state);
        true
    }

    pub fn live_call_for(&self, participant: &ParticipantId) -> Option<CallId> {
        self.occupancy.get(participant).map(|entry| entry.value().clone())
    }

    pub fn is_busy(&self, participant: &ParticipantId) -> bool {
        self.occupancy.contains_key(participant)
    }

    /// Snapshot of all live slots, for sweeps
    pub fn live_slots(&self) -> Vec<Arc<SessionSlot>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Forget tombstones older than `ttl`. Returns how many were dropped.
    pub fn prune_tombstones(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, tomb| now - tomb.finalized_at < ttl);
        let pruned = before.saturating_sub(self.tombstones.len());
        if pruned > 0 {
            debug!("Pruned {} call tombstones", pruned);
        }
        pruned
    }

    pub async fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            tombstones: self.tombstones.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_finalized: self.total_finalized.load(Ordering::Relaxed),
            ..Default::default()
        };

        for slot in self.live_slots() {
            let session = slot.lock().await;
            stats.live += 1;
            match session.state {
                CallState::Ringing => stats.ringing += 1,
                CallState::Accepted => stats.accepted += 1,
                CallState::Active => stats.active += 1,
                _ => {}
            }
        }

        stats
    }
}

impl SessionDirectory for CallSessionStore {
    fn participants(&self, call_id: &CallId) -> Option<(ParticipantId, ParticipantId)> {
        self.sessions
            .get(call_id)
            .map(|slot| (slot.caller_id.clone(), slot.callee_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallCategory, CallContext};

    fn ringing(caller: &str, callee: &str) -> CallSession {
        CallSession::new(
            CallId::new(),
            caller.into(),
            callee.into(),
            CallContext::default(),
            CallCategory::GeneralSupport,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_admit_reserves_both_participants() {
        let store = CallSessionStore::new();
        let session = ringing("a", "b");
        let call_id = session.call_id.clone();
        store.admit(session).unwrap();

        assert_eq!(store.live_call_for(&"a".into()), Some(call_id.clone()));
        assert_eq!(store.live_call_for(&"b".into()), Some(call_id.clone()));
        assert_eq!(
            store.participants(&call_id),
            Some(("a".into(), "b".into()))
        );
    }

    #[tokio::test]
    async fn test_busy_callee_rolls_back_caller_reservation() {
        let store = CallSessionStore::new();
        store.admit(ringing("b", "c")).unwrap();

        let attempt = ringing("a", "b");
        let err = store.admit(attempt).unwrap_err();
        assert!(matches!(err, CallError::Busy { ref participant, .. } if participant.as_str() == "b"));
        assert!(!store.is_busy(&"a".into()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_occupancy_always_resolves_to_a_slot() {
        let store = Arc::new(CallSessionStore::new());

        let admitting = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    store.admit(ringing(&format!("caller-{i}"), &format!("callee-{i}"))).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        while !admitting.is_finished() {
            for i in 0..500 {
                let caller = ParticipantId::from(format!("caller-{i}").as_str());
                if let Some(call_id) = store.live_call_for(&caller) {
                    let slot = store.get(&call_id).unwrap();
                    assert!(slot.involves(&caller));
                }
            }
            tokio::task::yield_now().await;
        }
        admitting.await.unwrap();
        assert_eq!(store.len(), 500);
    }

    #[tokio::test]
    async fn test_finalize_leaves_tombstone() {
        let store = CallSessionStore::new();
        let slot = store.admit(ringing("a", "b")).unwrap();
        let call_id = slot.call_id.clone();

        {
            let mut session = slot.lock().await;
            session.state = CallState::Missed;
            session.ended_at = Some(Utc::now());
            assert!(store.finalize(&session));
            assert!(!store.finalize(&session));
        }

        assert!(!store.is_busy(&"a".into()));
        assert!(store.participants(&call_id).is_none());
        match store.get(&call_id) {
            Err(CallError::SessionTerminal { state, .. }) => assert_eq!(state, CallState::Missed),
            other => panic!("expected terminal, got {:?}", other),
        }

        let later = Utc::now() + Duration::seconds(600);
        assert_eq!(store.prune_tombstones(later, Duration::seconds(300)), 1);
        assert!(matches!(store.get(&call_id), Err(CallError::SessionUnknown(_))));
    }

    #[tokio::test]
    async fn test_unknown_call() {
        let store = CallSessionStore::new();
        assert!(matches!(
            store.get(&CallId::from("nope")),
            Err(CallError::SessionUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_counts_states() {
        let store = CallSessionStore::new();
        store.admit(ringing("a", "b")).unwrap();
        let slot = store.admit(ringing("c", "d")).unwrap();
        slot.lock().await.state = CallState::Active;

        let stats = store.stats().await;
        assert_eq!(stats.live, 2);
        assert_eq!(stats.ringing, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total_created, 2);
    }
}
