//! Per-company conversation store
//!
//! Reads lock only the company's own session. Appends also hold the outer
//! map lock in shared mode for the duration of the write, so a `reset`
//! (exclusive) can never swap a session out from under an append in
//! progress. Unrelated companies still never wait on each other's sessions.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::store::{empty_snapshot, ConversationSession, MAX_HISTORY_EXCHANGES};
use crate::models::{CompanyId, Exchange, HistorySnapshot};

type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Thread-safe, bounded history of exchanges keyed by company
pub struct ConversationStore {
    sessions: RwLock<HashMap<CompanyId, SessionHandle>>,
    capacity: usize,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_EXCHANGES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.clamp(1, MAX_HISTORY_EXCHANGES),
        }
    }

    /// Immutable snapshot of at most five exchanges, oldest first.
    pub async fn get(&self, company_id: &CompanyId) -> HistorySnapshot {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions.get(company_id).cloned()
        };

        match handle {
            Some(handle) => handle.lock().await.snapshot(),
            None => empty_snapshot(),
        }
    }

    /// Append an exchange, creating the session on first use.
    ///
    /// An append ordered after a `reset` always lands in the new session.
    pub async fn append(&self, company_id: &CompanyId, exchange: Exchange) {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(company_id) {
                let mut session = handle.lock().await;
                log_append(company_id, &mut session, exchange);
                return;
            }
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions.entry(company_id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(ConversationSession::new(
                company_id.clone(),
                self.capacity,
            )))
        });
        let mut session = handle.lock().await;
        log_append(company_id, &mut session, exchange);
    }

    /// Replace the company's session with an empty one.
    ///
    /// Other companies' sessions are untouched.
    pub async fn reset(&self, company_id: &CompanyId) {
        let fresh = Arc::new(Mutex::new(ConversationSession::new(
            company_id.clone(),
            self.capacity,
        )));

        let mut sessions = self.sessions.write().await;
        sessions.insert(company_id.clone(), fresh);

        debug!(company_id = %company_id, "Conversation reset");
    }

    /// Number of companies with a session.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn log_append(company_id: &CompanyId, session: &mut ConversationSession, exchange: Exchange) {
    let evicted = session.append(exchange);
    debug!(
        company_id = %company_id,
        exchanges = session.len(),
        evicted,
        "Conversation exchange appended"
    );
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
