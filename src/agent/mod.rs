//! Main orchestrator - runs one question through the pipeline
//!
//! INIT → DISPATCHED → JOINING → SYNTHESIZING → DONE | FAILED
//!
//! Retrieval and web search run as separate tasks under a shared deadline.
//! A stage still running at the deadline is aborted and reported as a
//! `Timeout`; synthesis proceeds with whatever resolved. Only DONE appends
//! to conversation history.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::{compute_history_hash, RunLog, RunOutcome, RunRecord};
use crate::config::OrchestratorConfig;
use crate::documents::{DocumentCache, DocumentProvider};
use crate::error::{OrchestrationError, StageError};
use crate::memory::ConversationStore;
use crate::models::{
    CompanyContext, CompanyId, Exchange, HistorySnapshot, PipelineRequest, PipelineResult,
    PipelineState, StageKind, StageTimings,
};
use crate::pipeline::{RetrievalOutput, RetrievalStage, SynthesisStage, WebSearchStage};
use crate::providers::{AnalysisModel, SynthesisModel, WebSearchModel};
use crate::Result;

type StageOutcome<T> = (std::result::Result<T, StageError>, u64);

/// Coordinates stages, conversation memory and the run log
pub struct Orchestrator {
    config: OrchestratorConfig,
    conversations: Arc<ConversationStore>,
    retrieval: Arc<RetrievalStage>,
    web_search: Arc<WebSearchStage>,
    synthesis: SynthesisStage,
    run_log: Arc<RunLog>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        documents: Arc<dyn DocumentProvider>,
        analysis: Arc<dyn AnalysisModel>,
        web_search: Arc<dyn WebSearchModel>,
        synthesis: Arc<dyn SynthesisModel>,
    ) -> Self {
        let cache = Arc::new(DocumentCache::new(documents));
        let retry = config.retry.clone();

        Self {
            conversations: Arc::new(ConversationStore::with_capacity(config.history_capacity)),
            retrieval: Arc::new(RetrievalStage::new(cache, analysis, retry.clone())),
            web_search: Arc::new(WebSearchStage::new(web_search, retry.clone())),
            synthesis: SynthesisStage::new(synthesis, retry),
            run_log: Arc::new(RunLog::with_capacity(config.run_log_capacity)),
            config,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn document_cache(&self) -> &Arc<DocumentCache> {
        self.retrieval.cache()
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        &self.run_log
    }

    /// Current history for a company.
    pub async fn history(&self, company_id: &CompanyId) -> HistorySnapshot {
        self.conversations.get(company_id).await
    }

    /// Company switch: clear the history of the company being switched to.
    pub async fn reset(&self, company_id: &CompanyId) {
        info!(company_id = %company_id, "Company switch: resetting conversation");
        self.conversations.reset(company_id).await;
    }

    /// Answer `query` about an already-resolved company.
    pub async fn handle(&self, company: &CompanyContext, query: &str) -> Result<PipelineResult> {
        let started = Instant::now();

        // === INIT ===
        let history = self.conversations.get(&company.id).await;
        let request = Arc::new(PipelineRequest::new(company.clone(), query, history));
        transition(&request, PipelineState::Init);

        info!(
            run_id = %request.run_id,
            company_id = %company.id,
            history = request.history.len(),
            "Orchestrator: starting run"
        );

        // === DISPATCHED ===
        let deadline = tokio::time::Instant::now() + self.config.join_deadline;

        let retrieval_task = {
            let stage = Arc::clone(&self.retrieval);
            let request = Arc::clone(&request);
            tokio::spawn(async move {
                let t = Instant::now();
                let outcome = stage.run(&request).await;
                (outcome, elapsed_ms(t))
            })
        };

        let web_task = {
            let stage = Arc::clone(&self.web_search);
            let request = Arc::clone(&request);
            tokio::spawn(async move {
                let t = Instant::now();
                let outcome = stage.run(&request).await;
                (outcome, elapsed_ms(t))
            })
        };
        transition(&request, PipelineState::Dispatched);

        // === JOINING ===
        transition(&request, PipelineState::Joining);
        let ((retrieval, retrieval_ms), (web, web_search_ms)) = tokio::join!(
            join_stage::<RetrievalOutput>(retrieval_task, deadline, StageKind::Retrieval, started),
            join_stage::<String>(web_task, deadline, StageKind::WebSearch, started),
        );

        // === SYNTHESIZING ===
        transition(&request, PipelineState::Synthesizing);
        let synthesis_started = Instant::now();
        let outcome = self.synthesis.run(&request, retrieval, web).await;

        let mut timings = StageTimings {
            retrieval_ms: Some(retrieval_ms),
            web_search_ms: Some(web_search_ms),
            synthesis_ms: None,
            total_ms: 0,
        };

        match outcome {
            Ok(mut result) => {
                // === DONE ===
                timings.synthesis_ms = Some(elapsed_ms(synthesis_started));
                timings.total_ms = elapsed_ms(started);
                result.stage_timings = timings;

                self.conversations
                    .append(&company.id, Exchange::new(query, result.answer.clone()))
                    .await;
                transition(&request, PipelineState::Done);

                self.run_log
                    .record(run_record(
                        &request,
                        RunOutcome::Completed {
                            degraded: result.degraded,
                        },
                        result.stage_timings.clone(),
                        result.errors.clone(),
                    ))
                    .await;

                info!(
                    run_id = %request.run_id,
                    company_id = %company.id,
                    degraded = result.degraded,
                    total_ms = result.stage_timings.total_ms,
                    "Orchestrator: run complete"
                );
                Ok(result)
            }
            Err(e) => {
                // === FAILED ===
                let errors = match &e {
                    OrchestrationError::AllSourcesFailed { failures } => failures.clone(),
                    OrchestrationError::SynthesisFailed { upstream, .. } => {
                        timings.synthesis_ms = Some(elapsed_ms(synthesis_started));
                        upstream.clone()
                    }
                    _ => Vec::new(),
                };
                timings.total_ms = elapsed_ms(started);
                transition(&request, PipelineState::Failed);

                self.run_log
                    .record(run_record(
                        &request,
                        RunOutcome::Failed {
                            reason: e.to_string(),
                            failed_stages: e.failed_stages(),
                        },
                        timings,
                        errors,
                    ))
                    .await;

                error!(
                    run_id = %request.run_id,
                    company_id = %company.id,
                    error = %e,
                    "Orchestrator: run failed"
                );
                Err(e)
            }
        }
    }
}

fn transition(request: &PipelineRequest, state: PipelineState) {
    debug!(run_id = %request.run_id, state = ?state, "Pipeline state");
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Wait for a stage task until `deadline`; abort it if the deadline passes.
async fn join_stage<T>(
    mut handle: JoinHandle<StageOutcome<T>>,
    deadline: tokio::time::Instant,
    stage: StageKind,
    dispatched_at: Instant,
) -> StageOutcome<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            let reason = format!("{} task failed: {}", stage, join_error);
            let err = match stage {
                StageKind::WebSearch => StageError::WebSearchFailed { reason },
                _ => StageError::AnalysisFailed { reason },
            };
            (Err(err), elapsed_ms(dispatched_at))
        }
        Err(_) => {
            handle.abort();
            let after_ms = elapsed_ms(dispatched_at);
            warn!(stage = %stage, after_ms, "Stage exceeded deadline, aborted");
            (Err(StageError::Timeout { stage, after_ms }), after_ms)
        }
    }
}

fn run_record(
    request: &PipelineRequest,
    outcome: RunOutcome,
    stage_timings: StageTimings,
    errors: Vec<StageError>,
) -> RunRecord {
    RunRecord {
        run_id: request.run_id,
        company_id: request.company_id().clone(),
        query: request.query.clone(),
        outcome,
        stage_timings,
        errors,
        history_hash: compute_history_hash(&request.history),
        history_len: request.history.len(),
        completed_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::MockDocumentProvider;
    use crate::providers::{MockAnalysisModel, MockSynthesisModel, MockWebSearchModel};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    fn orchestrator(web: MockWebSearchModel) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::default().with_retry(RetryPolicy::fast()),
            Arc::new(MockDocumentProvider::new()),
            Arc::new(MockAnalysisModel::new()),
            Arc::new(web),
            Arc::new(MockSynthesisModel::new()),
        )
    }

    #[tokio::test]
    async fn test_orchestrator_handle() {
        let orchestrator = orchestrator(MockWebSearchModel::new());
        let company = CompanyContext::new("4742", "Airbus SE");

        let result = orchestrator.handle(&company, "What is the outlook?").await.unwrap();

        assert!(!result.degraded);
        assert!(result.stage_timings.synthesis_ms.is_some());
        assert_eq!(orchestrator.history(&company.id).await.len(), 1);

        let runs = orchestrator.run_log().list_for_company(&company.id).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, result.run_id);
        assert_eq!(runs[0].history_len, 0);
    }

    #[tokio::test]
    async fn test_run_log_keeps_most_recent_runs() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default()
                .with_retry(RetryPolicy::fast())
                .with_run_log_capacity(2),
            Arc::new(MockDocumentProvider::new()),
            Arc::new(MockAnalysisModel::new()),
            Arc::new(MockWebSearchModel::new()),
            Arc::new(MockSynthesisModel::new()),
        );
        let company = CompanyContext::new("4742", "Airbus SE");

        let mut run_ids = Vec::new();
        for query in ["Q1", "Q2", "Q3"] {
            run_ids.push(orchestrator.handle(&company, query).await.unwrap().run_id);
        }

        let kept: Vec<_> = orchestrator
            .run_log()
            .list_for_company(&company.id)
            .await
            .iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(kept, run_ids[1..].to_vec());
    }

    #[tokio::test]
    async fn test_slow_stage_times_out_and_run_degrades() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default()
                .with_retry(RetryPolicy::fast())
                .with_join_deadline(Duration::from_millis(50)),
            Arc::new(MockDocumentProvider::new()),
            Arc::new(MockAnalysisModel::new()),
            Arc::new(MockWebSearchModel::new().with_latency(Duration::from_secs(5))),
            Arc::new(MockSynthesisModel::new()),
        );
        let company = CompanyContext::new("4742", "Airbus SE");

        let result = orchestrator.handle(&company, "Q").await.unwrap();

        assert!(result.degraded);
        assert!(matches!(
            result.errors[0],
            StageError::Timeout {
                stage: StageKind::WebSearch,
                ..
            }
        ));
        assert!(result.stage_timings.total_ms < 5_000);
    }
}
