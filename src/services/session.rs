//! Per-user session state
//!
//! Holds each user's history and current dispatch record. The outer map lock
//! is only taken to look up or insert a user's handle; the read-decide-write
//! cycle for a user runs under that user's own lock, so users never block
//! each other and same-user submissions are serialized.

use crate::domain::dispatch::DispatchRecord;
use crate::domain::types::{HistorySample, UserId};
use crate::services::history::{HistoryTracker, OutOfOrder};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;

/// One user's state, only reachable through its session lock
#[derive(Debug, Clone)]
pub struct UserSession {
    history: HistoryTracker,
    record: DispatchRecord,
}

impl UserSession {
    fn new(history_capacity: usize) -> Self {
        Self { history: HistoryTracker::new(history_capacity), record: DispatchRecord::pending() }
    }

    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    pub fn record(&self) -> &DispatchRecord {
        &self.record
    }

    /// Append the newest sample and replace the dispatch record
    ///
    /// `decide` sees the history with the sample already appended. On an
    /// out-of-order sample nothing changes.
    pub fn commit<T>(
        &mut self,
        sample: HistorySample,
        decide: impl FnOnce(&HistoryTracker, &DispatchRecord) -> (DispatchRecord, T),
    ) -> Result<T, OutOfOrder> {
        self.history.append(sample)?;
        let (record, extra) = decide(&self.history, &self.record);
        self.record = record;
        Ok(extra)
    }

    /// Replace the record without a new sample (control operations)
    pub fn replace_record(&mut self, record: DispatchRecord) {
        self.record = record;
    }

    pub fn snapshot(&self, user_id: &UserId) -> SessionSnapshot {
        SessionSnapshot {
            user_id: user_id.clone(),
            history: self.history.clone(),
            dispatch: self.record.clone(),
        }
    }
}

/// Point-in-time copy of a user's state for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub history: HistoryTracker,
    pub dispatch: DispatchRecord,
}

/// Shared handle to one user's session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<UserSession>>,
}

impl SessionHandle {
    /// Enter the user's critical section
    pub fn lock(&self) -> MutexGuard<'_, UserSession> {
        self.inner.lock()
    }
}

/// Process-wide keyed session state
pub struct SessionStore {
    sessions: RwLock<FxHashMap<UserId, SessionHandle>>,
    history_capacity: usize,
}

impl SessionStore {
    pub fn new(history_capacity: usize) -> Self {
        Self { sessions: RwLock::new(FxHashMap::default()), history_capacity }
    }

    /// Handle for an existing user
    pub fn get(&self, user_id: &UserId) -> Option<SessionHandle> {
        self.sessions.read().get(user_id).cloned()
    }

    /// Handle for a user, creating an empty session on first contact
    ///
    /// Callers create sessions only for submissions they have already
    /// validated, so a key exists only after an accepted submission.
    pub fn get_or_create(&self, user_id: &UserId) -> SessionHandle {
        if let Some(handle) = self.get(user_id) {
            return handle;
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(user_id.clone())
            .or_insert_with(|| SessionHandle {
                inner: Arc::new(Mutex::new(UserSession::new(self.history_capacity))),
            })
            .clone()
    }

    /// Copy of a user's state, None for unknown users
    pub fn snapshot(&self, user_id: &UserId) -> Option<SessionSnapshot> {
        let handle = self.get(user_id)?;
        let session = handle.lock();
        Some(session.snapshot(user_id))
    }

    /// Number of users with a session
    pub fn user_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Dispatch status counts across users, sorted by status
    pub fn status_counts(&self) -> Vec<(&'static str, usize)> {
        let handles: Vec<SessionHandle> = self.sessions.read().values().cloned().collect();
        let mut counts: FxHashMap<&'static str, usize> = FxHashMap::default();
        for handle in handles {
            *counts.entry(handle.lock().record().status()).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_unstable();
        counts
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(crate::services::history::DEFAULT_HISTORY_CAPACITY)
    }
}
