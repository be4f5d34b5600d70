//! Mock models for development & testing
//!
//! Deterministic output, optional latency, scripted or permanent failures,
//! and a record of every call's history length.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{AnalysisModel, SynthesisModel, WebSearchModel};
use crate::error::ModelError;
use crate::models::{CompanyContext, DocumentBundle, Exchange};

/// Shared behaviour of every mock model
#[derive(Debug, Default)]
struct Script {
    latency: Duration,
    calls: AtomicUsize,
    /// Consumed one per call before `always` is consulted
    queued: Mutex<VecDeque<ModelError>>,
    always: Option<ModelError>,
    history_lens: Mutex<Vec<usize>>,
}

impl Script {
    async fn step(&self, history: &[Exchange]) -> Result<(), ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut lens) = self.history_lens.lock() {
            lens.push(history.len());
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        match queued.or_else(|| self.always.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn push_failure(&self, err: ModelError) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(err);
        }
    }

    fn history_lens(&self) -> Vec<usize> {
        self.history_lens.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

/// Transient failure used by tests that exercise the single retry.
pub fn transient_error(provider: &str) -> ModelError {
    ModelError::Transport {
        provider: provider.to_string(),
        message: "connection reset".to_string(),
    }
}

/// Permanent failure that is never retried.
pub fn permanent_error(provider: &str) -> ModelError {
    ModelError::Api {
        provider: provider.to_string(),
        status: 400,
        message: "bad request".to_string(),
    }
}

macro_rules! mock_builders {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn with_latency(mut self, latency: Duration) -> Self {
                self.script.latency = latency;
                self
            }

            /// Fail the next call; queued failures are used in order.
            pub fn fail_next(self, err: ModelError) -> Self {
                self.script.push_failure(err);
                self
            }

            /// Fail every call not covered by a queued failure.
            pub fn always_fail(mut self, err: ModelError) -> Self {
                self.script.always = Some(err);
                self
            }

            pub fn call_count(&self) -> usize {
                self.script.calls.load(Ordering::SeqCst)
            }

            /// History length seen by each call, in call order.
            pub fn history_lens(&self) -> Vec<usize> {
                self.script.history_lens()
            }
        }
    };
}

//
// ================= Analysis =================
//

#[derive(Debug, Default)]
pub struct MockAnalysisModel {
    script: Script,
}

mock_builders!(MockAnalysisModel);

#[async_trait]
impl AnalysisModel for MockAnalysisModel {
    async fn analyze(
        &self,
        bundle: &DocumentBundle,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError> {
        self.script.step(history).await?;
        Ok(format!(
            "Document analysis of {} documents for {}: {}",
            bundle.len(),
            bundle.company_id,
            query
        ))
    }
}

//
// ================= Web search =================
//

#[derive(Debug, Default)]
pub struct MockWebSearchModel {
    script: Script,
}

mock_builders!(MockWebSearchModel);

#[async_trait]
impl WebSearchModel for MockWebSearchModel {
    async fn search(
        &self,
        company: &CompanyContext,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError> {
        self.script.step(history).await?;
        Ok(format!("Web findings for {}: {}", company.display_name, query))
    }
}

//
// ================= Synthesis =================
//

#[derive(Debug, Default)]
pub struct MockSynthesisModel {
    script: Script,
}

mock_builders!(MockSynthesisModel);

#[async_trait]
impl SynthesisModel for MockSynthesisModel {
    async fn combine(
        &self,
        analysis: Option<&str>,
        web: Option<&str>,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError> {
        self.script.step(history).await?;

        let mut answer = format!("Answer to '{}'.", query);
        if let Some(analysis) = analysis {
            answer.push_str(&format!("\nFrom company documents: {}", analysis));
        }
        if let Some(web) = web {
            answer.push_str(&format!("\nFrom current web sources: {}", web));
        }
        Ok(answer)
    }
}
