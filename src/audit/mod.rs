//! Run log
//!
//! Every finished pipeline run, successful or not, is recorded with its
//! timings, stage errors and a hash of the history snapshot it saw.
//! Only the most recent runs are kept; the oldest record is evicted first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StageError;
use crate::models::{CompanyId, Exchange, StageKind, StageTimings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { degraded: bool },
    Failed { reason: String, failed_stages: Vec<StageKind> },
}

/// One finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub company_id: CompanyId,
    pub query: String,
    pub outcome: RunOutcome,
    pub stage_timings: StageTimings,
    pub errors: Vec<StageError>,
    /// SHA256 of the history snapshot the run was given
    pub history_hash: String,
    pub history_len: usize,
    pub completed_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }
}

pub const DEFAULT_RUN_LOG_CAPACITY: usize = 1_000;

/// Bounded log of recent runs, kept in completion order
pub struct RunLog {
    records: Arc<RwLock<VecDeque<RunRecord>>>,
    capacity: usize,
}

impl RunLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RUN_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn record(&self, record: RunRecord) -> Uuid {
        let run_id = record.run_id;
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        run_id
    }

    pub async fn get(&self, run_id: Uuid) -> Option<RunRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.run_id == run_id).cloned()
    }

    /// Runs for one company, oldest completion first.
    pub async fn list_for_company(&self, company_id: &CompanyId) -> Vec<RunRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| &r.company_id == company_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Check that `history` is the snapshot the run was given.
    pub async fn verify_snapshot(&self, run_id: Uuid, history: &[Exchange]) -> bool {
        match self.get(run_id).await {
            Some(record) => compute_history_hash(history) == record.history_hash,
            None => false,
        }
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA256 of a history snapshot, streamed into the hasher as JSON
pub fn compute_history_hash(history: &[Exchange]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), history).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
