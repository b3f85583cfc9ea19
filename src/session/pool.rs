//! Session rotation pool
//!
//! Tracks live sessions and their send counters. Selection and the
//! increment-and-retire step run inside one lock, so two concurrent sends
//! can never push the same session past its quota or retire it twice.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Identifier for one pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no active sessions")]
pub struct NoActiveSession;

/// Outcome of recording one successful send.
#[derive(Debug)]
pub enum RecordOutcome<S> {
    /// Counter incremented; the session stays pooled.
    Recorded(u32),
    /// Counter reached the quota; the slot was removed in the same critical
    /// section, so exactly one caller observes this per session.
    Retired(Arc<S>),
    /// The session was already gone (retired or discarded concurrently).
    Vacant,
}

struct PoolSlot<S> {
    id: SessionId,
    session: Arc<S>,
    sent_count: u32,
}

struct PoolInner<S> {
    slots: Vec<PoolSlot<S>>,
    next_id: u64,
}

/// Ordered collection of live sessions with per-session send counters.
///
/// Generic over the session handle so rotation logic is testable without a
/// browser. Empty is a valid "not ready" state.
pub struct SessionPool<S> {
    inner: Mutex<PoolInner<S>>,
    quota: u32,
}

impl<S> SessionPool<S> {
    pub fn new(quota: u32) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                slots: Vec::new(),
                next_id: 0,
            }),
            quota: quota.max(1),
        }
    }

    pub async fn insert(&self, session: Arc<S>) -> SessionId {
        let mut inner = self.inner.lock().await;
        let id = SessionId(inner.next_id);
        inner.next_id += 1;
        inner.slots.push(PoolSlot {
            id,
            session,
            sent_count: 0,
        });
        id
    }

    /// Least-loaded session; insertion order breaks ties.
    pub async fn select(&self) -> Result<(SessionId, Arc<S>), NoActiveSession> {
        let inner = self.inner.lock().await;
        inner
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(idx, slot)| (slot.sent_count, *idx))
            .map(|(_, slot)| (slot.id, Arc::clone(&slot.session)))
            .ok_or(NoActiveSession)
    }

    /// Increment the counter for `id`, retiring the slot when it reaches
    /// the quota.
    pub async fn record_send(&self, id: SessionId) -> RecordOutcome<S> {
        let mut inner = self.inner.lock().await;
        let Some(pos) = inner.slots.iter().position(|slot| slot.id == id) else {
            return RecordOutcome::Vacant;
        };
        inner.slots[pos].sent_count += 1;
        if inner.slots[pos].sent_count >= self.quota {
            let slot = inner.slots.remove(pos);
            RecordOutcome::Retired(slot.session)
        } else {
            RecordOutcome::Recorded(inner.slots[pos].sent_count)
        }
    }

    /// Out-of-band removal, for sessions deemed unrecoverable.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<S>> {
        let mut inner = self.inner.lock().await;
        let pos = inner.slots.iter().position(|slot| slot.id == id)?;
        Some(inner.slots.remove(pos).session)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    /// Remove and return every session (shutdown path).
    pub async fn drain(&self) -> Vec<Arc<S>> {
        let mut inner = self.inner.lock().await;
        inner.slots.drain(..).map(|slot| slot.session).collect()
    }

    /// Current counters in insertion order.
    #[cfg(test)]
    pub(crate) async fn counts(&self) -> Vec<u32> {
        let inner = self.inner.lock().await;
        inner.slots.iter().map(|slot| slot.sent_count).collect()
    }
}
