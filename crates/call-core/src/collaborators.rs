//! External collaborator seams
//!
//! The core consults a block list at `initiate` and hands every finished
//! call to a record sink exactly once. Both are traits so the host
//! application can plug in its own identity service and data store.

use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::errors::{CallError, Result};
use crate::session::CallSession;
use crate::types::{CallId, ParticipantId};

/// Identity and block-list check
#[async_trait]
pub trait BlockList: Send + Sync {
    /// Whether a call from `caller` to `callee` is vetoed
    async fn is_blocked(&self, caller: &ParticipantId, callee: &ParticipantId) -> bool;
}

/// Persistence sink for finished calls. The core never reads history back.
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    async fn save(&self, session: CallSession) -> Result<()>;
}

/// Block list that allows every pair
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBlocking;

#[async_trait]
impl BlockList for NoBlocking {
    async fn is_blocked(&self, _caller: &ParticipantId, _callee: &ParticipantId) -> bool {
        false
    }
}

/// Fixed set of blocked pairs. A block applies in both directions.
#[derive(Debug, Default)]
pub struct StaticBlockList {
    pairs: DashSet<(ParticipantId, ParticipantId)>,
}

impl StaticBlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, a: impl Into<ParticipantId>, b: impl Into<ParticipantId>) {
        self.pairs.insert(ordered(a.into(), b.into()));
    }

    pub fn unblock(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        self.pairs.remove(&ordered(a.clone(), b.clone())).is_some()
    }
}

fn ordered(a: ParticipantId, b: ParticipantId) -> (ParticipantId, ParticipantId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[async_trait]
impl BlockList for StaticBlockList {
    async fn is_blocked(&self, caller: &ParticipantId, callee: &ParticipantId) -> bool {
        self.pairs.contains(&ordered(caller.clone(), callee.clone()))
    }
}

/// Record sink that keeps every saved call in memory. A second save for
/// the same call id is refused with `CallError::Persistence`.
#[derive(Debug, Default)]
pub struct InMemoryCallRecords {
    records: Mutex<Vec<CallSession>>,
    saved: Notify,
    refused: AtomicUsize,
}

impl InMemoryCallRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<CallSession> {
        self.records.lock().await.clone()
    }

    /// Saves refused as duplicates
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::Relaxed)
    }

    /// Number of times `call_id` has been saved
    pub async fn count_for(&self, call_id: &CallId) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.call_id == *call_id)
            .count()
    }

    /// Wait until `call_id` has been saved, up to `timeout`
    pub async fn wait_for(&self, call_id: &CallId, timeout: Duration) -> Option<CallSession> {
        let wait = async {
            loop {
                let notified = self.saved.notified();
                if let Some(record) = self.find(call_id).await {
                    return record;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    async fn find(&self, call_id: &CallId) -> Option<CallSession> {
        self.records
            .lock()
            .await
            .iter()
            .find(|record| record.call_id == *call_id)
            .cloned()
    }
}

#[async_trait]
impl CallRecordSink for InMemoryCallRecords {
    async fn save(&self, session: CallSession) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.iter().any(|record| record.call_id == session.call_id) {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return Err(CallError::persistence(format!(
                "call {} is already recorded",
                session.call_id
            )));
        }
        records.push(session);
        drop(records);
        self.saved.notify_waiters();
        Ok(())
    }
}
