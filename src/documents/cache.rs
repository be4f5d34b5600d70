//! Single-flight document cache
//!
//! Each company has its own slot holding a small state machine:
//!
//! ```text
//! Vacant ──ensure──▶ Pending ──ok──▶ Ready ──invalidate──▶ Vacant
//!    ▲                  │
//!    └──── ensure ◀── Failed ◀──err──┘
//! ```
//!
//! The first caller for a vacant (or failed) slot starts the fetch; every
//! caller arriving while it is pending joins its waiter list. The fetch runs
//! on its own task, so a caller that gives up (deadline, cancellation) does
//! not abort the fetch for everyone else, and a finished fetch is still
//! cached for later callers. Failures are delivered to the current waiters
//! only; the next `ensure` starts a fresh attempt.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::DocumentProvider;
use crate::error::DocumentError;
use crate::models::{CompanyId, DocumentBundle};

type FetchOutcome = Result<Arc<DocumentBundle>, DocumentError>;
type Slot = Arc<Mutex<CacheEntry>>;

/// Externally visible state of a cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Pending,
    Ready,
    Failed,
}

enum EntryState {
    Vacant,
    Pending {
        waiters: Vec<oneshot::Sender<FetchOutcome>>,
        /// Set when invalidated mid-fetch; the result is delivered but not kept
        discard: bool,
    },
    Ready(Arc<DocumentBundle>),
    Failed {
        error: DocumentError,
        failed_at: DateTime<Utc>,
    },
}

struct CacheEntry {
    company_id: CompanyId,
    state: EntryState,
}

/// Deduplicating cache in front of a [`DocumentProvider`]
pub struct DocumentCache {
    provider: Arc<dyn DocumentProvider>,
    slots: RwLock<HashMap<CompanyId, Slot>>,
    fetches: Arc<AtomicU64>,
}

impl DocumentCache {
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self {
            provider,
            slots: RwLock::new(HashMap::new()),
            fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the company's bundle, fetching it if nothing valid is cached.
    ///
    /// Concurrent callers for the same company share one fetch and all
    /// receive the same bundle or the same error.
    pub async fn ensure(&self, company_id: &CompanyId) -> FetchOutcome {
        let slot = self.slot(company_id).await;

        let receiver = {
            let mut entry = slot.lock().await;
            let (sender, receiver) = oneshot::channel();

            match &mut entry.state {
                EntryState::Ready(bundle) => {
                    debug!(company_id = %company_id, "Document cache hit");
                    return Ok(Arc::clone(bundle));
                }
                EntryState::Pending { waiters, .. } => {
                    waiters.push(sender);
                    debug!(
                        company_id = %company_id,
                        waiters = waiters.len(),
                        "Joining in-flight document fetch"
                    );
                }
                EntryState::Vacant | EntryState::Failed { .. } => {
                    if let EntryState::Failed { error, failed_at } = &entry.state {
                        debug!(
                            company_id = %company_id,
                            previous_error = %error,
                            failed_at = %failed_at,
                            "Retrying document fetch after failure"
                        );
                    }
                    entry.state = EntryState::Pending {
                        waiters: vec![sender],
                        discard: false,
                    };
                    self.start_fetch(company_id.clone(), Arc::clone(&slot));
                }
            }

            receiver
        };

        receiver.await.unwrap_or_else(|_| {
            Err(DocumentError::Aborted(format!(
                "fetch for {} ended without a result",
                company_id
            )))
        })
    }

    /// Drop the cached bundle so the next `ensure` fetches again.
    ///
    /// A pending fetch still completes for its waiters but is not cached.
    pub async fn invalidate(&self, company_id: &CompanyId) {
        let slot = {
            let slots = self.slots.read().await;
            match slots.get(company_id) {
                Some(slot) => Arc::clone(slot),
                None => return,
            }
        };

        let mut entry = slot.lock().await;
        match &mut entry.state {
            EntryState::Pending { discard, .. } => *discard = true,
            _ => entry.state = EntryState::Vacant,
        }
        info!(company_id = %company_id, "Document cache entry invalidated");
    }

    /// Current state of a company's slot, `None` if nothing is held.
    pub async fn status(&self, company_id: &CompanyId) -> Option<CacheStatus> {
        let slot = {
            let slots = self.slots.read().await;
            Arc::clone(slots.get(company_id)?)
        };

        let entry = slot.lock().await;
        match entry.state {
            EntryState::Vacant => None,
            EntryState::Pending { .. } => Some(CacheStatus::Pending),
            EntryState::Ready(_) => Some(CacheStatus::Ready),
            EntryState::Failed { .. } => Some(CacheStatus::Failed),
        }
    }

    /// Total provider fetches started by this cache.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn slot(&self, company_id: &CompanyId) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(company_id) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(company_id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(CacheEntry {
                company_id: company_id.clone(),
                state: EntryState::Vacant,
            }))
        }))
    }

    /// Spawn the fetch. Must be called with the slot just set to `Pending`.
    fn start_fetch(&self, company_id: CompanyId, slot: Slot) {
        let provider = Arc::clone(&self.provider);
        self.fetches.fetch_add(1, Ordering::SeqCst);

        info!(company_id = %company_id, "Fetching company documents");

        tokio::spawn(async move {
            let started = std::time::Instant::now();

            // Run the provider on its own task so a panic inside it still
            // resolves the waiters.
            let fetch_company = company_id.clone();
            let fetch =
                tokio::spawn(async move { provider.fetch_and_normalize(&fetch_company).await });

            let outcome: FetchOutcome = match fetch.await {
                Ok(Ok(bundle)) => Ok(Arc::new(bundle)),
                Ok(Err(e)) => Err(e),
                Err(join_error) => Err(DocumentError::Aborted(join_error.to_string())),
            };

            let waiters = {
                let mut entry = slot.lock().await;
                complete(&mut entry, &outcome)
            };

            match &outcome {
                Ok(bundle) => info!(
                    company_id = %company_id,
                    documents = bundle.len(),
                    waiters = waiters.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Document fetch completed"
                ),
                Err(e) => warn!(
                    company_id = %company_id,
                    error = %e,
                    waiters = waiters.len(),
                    "Document fetch failed"
                ),
            }

            for waiter in waiters {
                // A waiter that stopped listening is fine to skip.
                let _ = waiter.send(outcome.clone());
            }
        });
    }
}

/// Move a pending entry to its terminal state and hand back its waiters.
fn complete(entry: &mut CacheEntry, outcome: &FetchOutcome) -> Vec<oneshot::Sender<FetchOutcome>> {
    let (waiters, discard) = match std::mem::replace(&mut entry.state, EntryState::Vacant) {
        EntryState::Pending { waiters, discard } => (waiters, discard),
        other => {
            warn!(
                company_id = %entry.company_id,
                "Fetch completed for a slot that was not pending"
            );
            entry.state = other;
            return Vec::new();
        }
    };

    entry.state = match outcome {
        Ok(_) if discard => EntryState::Vacant,
        Ok(bundle) => EntryState::Ready(Arc::clone(bundle)),
        Err(error) => EntryState::Failed {
            error: error.clone(),
            failed_at: Utc::now(),
        },
    };

    waiters
}
