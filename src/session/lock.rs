// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-session locks with FIFO hand-off
//!
//! Acquisition never blocks: a caller either gets the guard immediately or
//! joins the session's wait queue and receives the guard over a oneshot
//! channel when the current holder releases. Release hands the lock to the
//! earliest live waiter directly, so the session is never observed free
//! while someone is queued.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TandemError};

/// Default bound on waiters per session
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 16;

#[derive(Debug)]
struct Holder {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Waiter {
    grant: oneshot::Sender<SessionLockGuard>,
}

#[derive(Debug, Default)]
struct LockEntry {
    holder: Option<Holder>,
    waiters: VecDeque<Waiter>,
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<String, LockEntry>,
    next_generation: u64,
}

impl LockTable {
    fn new_guard(&mut self, inner: &Arc<Mutex<LockTable>>, session_id: &str) -> SessionLockGuard {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let entry = self.entries.entry(session_id.to_string()).or_default();
        entry.holder = Some(Holder {
            generation,
            cancel: cancel.clone(),
        });
        SessionLockGuard {
            session_id: session_id.to_string(),
            generation,
            cancel,
            table: Arc::clone(inner),
            released: false,
        }
    }
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    match table.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "tandem.session.lock", "Lock table was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Hand the lock to the next live waiter or free the session.
///
/// Guards that fail to reach their waiter are defused before being
/// dropped, so this never re-enters itself.
fn release_inner(inner: &Arc<Mutex<LockTable>>, session_id: &str, generation: u64) {
    let mut table = lock_table(inner);

    let is_holder = table
        .entries
        .get(session_id)
        .and_then(|entry| entry.holder.as_ref())
        .map(|holder| holder.generation == generation)
        .unwrap_or(false);
    if !is_holder {
        tracing::trace!(
            target: "tandem.session.lock",
            session_id,
            generation,
            "Ignoring release from a stale guard"
        );
        return;
    }

    loop {
        let waiter = table
            .entries
            .get_mut(session_id)
            .and_then(|entry| entry.waiters.pop_front());
        let Some(waiter) = waiter else {
            break;
        };
        if waiter.grant.is_closed() {
            continue;
        }

        let guard = table.new_guard(inner, session_id);
        match waiter.grant.send(guard) {
            Ok(()) => {
                tracing::debug!(target: "tandem.session.lock", session_id, "Lock handed to next waiter");
                return;
            }
            Err(mut guard) => {
                guard.released = true;
            }
        }
    }

    table.entries.remove(session_id);
    tracing::debug!(target: "tandem.session.lock", session_id, "Lock released");
}

/// Exclusive right to run a turn on one session
#[derive(Debug)]
pub struct SessionLockGuard {
    session_id: String,
    generation: u64,
    cancel: CancellationToken,
    table: Arc<Mutex<LockTable>>,
    released: bool,
}

impl SessionLockGuard {
    /// Session this guard holds
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token cancelled by `SessionLocks::cancel` or dispose
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the holder was asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release the lock, handing it to the next waiter if any
    pub fn release(mut self) {
        self.released = true;
        release_inner(&self.table, &self.session_id, self.generation);
    }
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                target: "tandem.session.lock",
                session_id = %self.session_id,
                "Session lock released by drop"
            );
            release_inner(&self.table, &self.session_id, self.generation);
        }
    }
}

/// A place in a session's wait queue
#[derive(Debug)]
pub struct QueueTicket {
    session_id: String,
    position: usize,
    receiver: oneshot::Receiver<SessionLockGuard>,
}

impl QueueTicket {
    /// Session this ticket waits for
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Number of requests ahead of this one when it was enqueued
    pub fn position(&self) -> usize {
        self.position
    }

    /// Wait for the hand-off; fails with `QueueDisposed` if torn down
    pub async fn wait(self) -> Result<SessionLockGuard> {
        self.receiver
            .await
            .map_err(|_| TandemError::QueueDisposed(self.session_id))
    }
}

/// Result of `acquire_or_enqueue`
#[derive(Debug)]
pub enum Acquisition {
    /// The lock was free
    Acquired(SessionLockGuard),
    /// The lock is held; wait on the ticket
    Queued(QueueTicket),
}

/// Lock table for all sessions
#[derive(Debug, Clone)]
pub struct SessionLocks {
    inner: Arc<Mutex<LockTable>>,
    max_queue_depth: usize,
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_DEPTH)
    }
}

impl SessionLocks {
    /// Create a lock table with a per-session waiter bound
    pub fn new(max_queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LockTable::default())),
            max_queue_depth,
        }
    }

    /// Take the lock if free, otherwise fail with `SessionBusy`
    pub fn try_acquire(&self, session_id: &str) -> Result<SessionLockGuard> {
        let mut table = lock_table(&self.inner);
        let held = table
            .entries
            .get(session_id)
            .map(|entry| entry.holder.is_some())
            .unwrap_or(false);
        if held {
            return Err(TandemError::SessionBusy(session_id.to_string()));
        }
        tracing::debug!(target: "tandem.session.lock", session_id, "Lock acquired");
        Ok(table.new_guard(&self.inner, session_id))
    }

    /// Take the lock if free, otherwise join the FIFO queue
    pub fn acquire_or_enqueue(&self, session_id: &str) -> Result<Acquisition> {
        let mut table = lock_table(&self.inner);
        let entry = table.entries.entry(session_id.to_string()).or_default();
        if entry.holder.is_none() {
            tracing::debug!(target: "tandem.session.lock", session_id, "Lock acquired");
            return Ok(Acquisition::Acquired(
                table.new_guard(&self.inner, session_id),
            ));
        }

        entry.waiters.retain(|w| !w.grant.is_closed());
        let depth = entry.waiters.len();
        if depth >= self.max_queue_depth {
            return Err(TandemError::QueueFull {
                session_id: session_id.to_string(),
                depth,
            });
        }

        let (grant, receiver) = oneshot::channel();
        entry.waiters.push_back(Waiter { grant });
        tracing::debug!(
            target: "tandem.session.lock",
            session_id,
            position = depth,
            "Request queued"
        );
        Ok(Acquisition::Queued(QueueTicket {
            session_id: session_id.to_string(),
            position: depth,
            receiver,
        }))
    }

    /// Explicit release; equivalent to `guard.release()`
    pub fn release(&self, guard: SessionLockGuard) {
        guard.release();
    }

    /// Cancel the current holder's token; returns whether one existed
    pub fn cancel(&self, session_id: &str) -> bool {
        let table = lock_table(&self.inner);
        match table
            .entries
            .get(session_id)
            .and_then(|entry| entry.holder.as_ref())
        {
            Some(holder) => {
                holder.cancel.cancel();
                tracing::debug!(target: "tandem.session.lock", session_id, "Holder cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel the holder and reject every waiter with `QueueDisposed`
    pub fn dispose(&self, session_id: &str) {
        let waiters = {
            let mut table = lock_table(&self.inner);
            match table.entries.get_mut(session_id) {
                Some(entry) => {
                    if let Some(holder) = &entry.holder {
                        holder.cancel.cancel();
                    }
                    std::mem::take(&mut entry.waiters)
                }
                None => VecDeque::new(),
            }
        };
        if !waiters.is_empty() {
            tracing::debug!(
                target: "tandem.session.lock",
                session_id,
                rejected = waiters.len(),
                "Queue disposed"
            );
        }
    }

    /// Dispose every session
    pub fn dispose_all(&self) {
        let ids: Vec<String> = lock_table(&self.inner).entries.keys().cloned().collect();
        for id in ids {
            self.dispose(&id);
        }
    }

    /// Whether a turn currently holds the session
    pub fn is_locked(&self, session_id: &str) -> bool {
        lock_table(&self.inner)
            .entries
            .get(session_id)
            .map(|entry| entry.holder.is_some())
            .unwrap_or(false)
    }

    /// Live waiters for a session
    pub fn queue_len(&self, session_id: &str) -> usize {
        lock_table(&self.inner)
            .entries
            .get(session_id)
            .map(|entry| entry.waiters.iter().filter(|w| !w.grant.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queued(acquisition: Acquisition) -> QueueTicket {
        match acquisition {
            Acquisition::Queued(ticket) => ticket,
            Acquisition::Acquired(_) => panic!("Expected Queued"),
        }
    }

    fn acquired(acquisition: Acquisition) -> SessionLockGuard {
        match acquisition {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Queued(_) => panic!("Expected Acquired"),
        }
    }

    // ===== try_acquire Tests =====

    #[test]
    fn test_try_acquire_exclusive() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        assert!(locks.is_locked("s1"));

        let err = locks.try_acquire("s1").unwrap_err();
        assert!(matches!(err, TandemError::SessionBusy(_)));

        guard.release();
        assert!(!locks.is_locked("s1"));
        assert!(locks.try_acquire("s1").is_ok());
    }

    #[test]
    fn test_sessions_are_independent() {
        let locks = SessionLocks::default();
        let _a = locks.try_acquire("a").unwrap();
        let _b = locks.try_acquire("b").unwrap();
        assert!(locks.is_locked("a") && locks.is_locked("b"));
    }

    // ===== Queue Tests =====

    #[tokio::test]
    async fn test_release_hands_off_fifo() {
        let locks = SessionLocks::default();
        let guard = acquired(locks.acquire_or_enqueue("s1").unwrap());
        let first = queued(locks.acquire_or_enqueue("s1").unwrap());
        let second = queued(locks.acquire_or_enqueue("s1").unwrap());
        assert_eq!(first.position(), 0);
        assert_eq!(second.position(), 1);
        assert_eq!(locks.queue_len("s1"), 2);

        guard.release();
        // Still locked: ownership moved to the first waiter
        assert!(locks.is_locked("s1"));
        assert_eq!(locks.queue_len("s1"), 1);

        let first_guard = first.wait().await.unwrap();
        first_guard.release();
        let second_guard = second.wait().await.unwrap();
        assert!(locks.is_locked("s1"));
        second_guard.release();
        assert!(!locks.is_locked("s1"));
    }

    #[tokio::test]
    async fn test_dropped_ticket_is_skipped() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        let abandoned = queued(locks.acquire_or_enqueue("s1").unwrap());
        let live = queued(locks.acquire_or_enqueue("s1").unwrap());
        drop(abandoned);

        guard.release();
        let next = live.wait().await.unwrap();
        assert_eq!(next.session_id(), "s1");
        next.release();
        assert!(!locks.is_locked("s1"));
    }

    #[test]
    fn test_release_with_only_dropped_tickets_frees_session() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        drop(queued(locks.acquire_or_enqueue("s1").unwrap()));
        guard.release();
        assert!(!locks.is_locked("s1"));
    }

    #[test]
    fn test_queue_full() {
        let locks = SessionLocks::new(2);
        let _guard = locks.try_acquire("s1").unwrap();
        let _t1 = queued(locks.acquire_or_enqueue("s1").unwrap());
        let _t2 = queued(locks.acquire_or_enqueue("s1").unwrap());
        let err = locks.acquire_or_enqueue("s1").unwrap_err();
        assert!(matches!(err, TandemError::QueueFull { depth: 2, .. }));
    }

    #[tokio::test]
    async fn test_dispose_rejects_waiters_and_cancels_holder() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        let ticket = queued(locks.acquire_or_enqueue("s1").unwrap());

        locks.dispose("s1");
        assert!(guard.is_cancelled());
        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, TandemError::QueueDisposed(_)));

        guard.release();
        assert!(!locks.is_locked("s1"));
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let locks = SessionLocks::default();
        let a = locks.try_acquire("a").unwrap();
        let b = locks.try_acquire("b").unwrap();
        let ta = queued(locks.acquire_or_enqueue("a").unwrap());
        locks.dispose_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(ta.wait().await.is_err());
    }

    // ===== Cancellation Tests =====

    #[test]
    fn test_cancel_holder() {
        let locks = SessionLocks::default();
        assert!(!locks.cancel("s1"));
        let guard = locks.try_acquire("s1").unwrap();
        let token = guard.cancel_token();
        assert!(locks.cancel("s1"));
        assert!(token.is_cancelled());
        // Cancellation does not release by itself
        assert!(locks.is_locked("s1"));
        locks.release(guard);
        assert!(!locks.is_locked("s1"));
    }

    #[test]
    fn test_new_holder_gets_fresh_token() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        locks.cancel("s1");
        guard.release();
        let next = locks.try_acquire("s1").unwrap();
        assert!(!next.is_cancelled());
    }

    // ===== Drop backstop Tests =====

    #[tokio::test]
    async fn test_drop_releases_and_hands_off() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        let ticket = queued(locks.acquire_or_enqueue("s1").unwrap());
        drop(guard);
        let next = ticket.wait().await.unwrap();
        next.release();
        assert!(!locks.is_locked("s1"));
    }

    #[tokio::test]
    async fn test_guard_dropped_in_flight_passes_lock_on() {
        let locks = SessionLocks::default();
        let guard = locks.try_acquire("s1").unwrap();
        let first = queued(locks.acquire_or_enqueue("s1").unwrap());
        let second = queued(locks.acquire_or_enqueue("s1").unwrap());

        guard.release();
        // The first waiter received the guard but goes away without using it
        drop(first);
        let next = second.wait().await.unwrap();
        next.release();
        assert!(!locks.is_locked("s1"));
    }

    proptest! {
        #[test]
        fn prop_queue_len_tracks_enqueues(n in 0usize..10) {
            let locks = SessionLocks::new(16);
            let guard = locks.try_acquire("s").unwrap();
            let tickets: Vec<_> = (0..n)
                .map(|_| queued(locks.acquire_or_enqueue("s").unwrap()))
                .collect();
            prop_assert_eq!(locks.queue_len("s"), n);
            prop_assert!(locks.try_acquire("s").is_err());
            drop(tickets);
            guard.release();
            prop_assert!(!locks.is_locked("s"));
        }
    }
}
