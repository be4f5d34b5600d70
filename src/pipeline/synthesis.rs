//! Synthesis stage
//!
//! | retrieval | web search | outcome                                  |
//! |-----------|------------|------------------------------------------|
//! | ok        | ok         | combined answer, both sources attributed |
//! | ok        | err        | degraded, notes web info was unavailable |
//! | err       | ok         | degraded, notes documents were unavailable |
//! | err       | err        | `AllSourcesFailed`, no model call        |

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::RetrievalOutput;
use crate::error::{OrchestrationError, StageError};
use crate::models::{PipelineRequest, PipelineResult, SourceSummary, StageTimings};
use crate::providers::SynthesisModel;
use crate::retry::RetryPolicy;
use crate::Result;

const WEB_UNAVAILABLE_NOTE: &str =
    "_Note: current web information was unavailable, \
     so this answer is based on company documents only._";
const DOCUMENTS_UNAVAILABLE_NOTE: &str =
    "_Note: company documents were unavailable, \
     so this answer is based on current web information only._";

pub struct SynthesisStage {
    model: Arc<dyn SynthesisModel>,
    retry: RetryPolicy,
}

impl SynthesisStage {
    pub fn new(model: Arc<dyn SynthesisModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn run(
        &self,
        request: &PipelineRequest,
        retrieval: std::result::Result<RetrievalOutput, StageError>,
        web: std::result::Result<String, StageError>,
    ) -> Result<PipelineResult> {
        let (retrieval, web, errors) = match (retrieval, web) {
            (Err(retrieval_err), Err(web_err)) => {
                return Err(OrchestrationError::AllSourcesFailed {
                    failures: vec![retrieval_err, web_err],
                });
            }
            (Ok(retrieval), Ok(web)) => (Some(retrieval), Some(web), Vec::new()),
            (Ok(retrieval), Err(e)) => (Some(retrieval), None, vec![e]),
            (Err(e), Ok(web)) => (None, Some(web), vec![e]),
        };

        let degraded = !errors.is_empty();
        if degraded {
            warn!(
                run_id = %request.run_id,
                missing = %errors[0].stage(),
                error = %errors[0],
                "Synthesizing degraded answer"
            );
        }

        let analysis_text = retrieval.as_ref().map(|r| r.analysis.as_str());
        let web_text = web.as_deref();

        let answer = self
            .retry
            .execute("synthesis", || {
                self.model
                    .combine(analysis_text, web_text, &request.query, &request.history)
            })
            .await
            .map_err(|e| OrchestrationError::SynthesisFailed {
                reason: e.to_string(),
                upstream: errors.clone(),
            })?;

        let source_summary = SourceSummary {
            used_documents: retrieval.is_some(),
            used_web_search: web.is_some(),
            bundle_fingerprint: retrieval.as_ref().map(|r| r.bundle.fingerprint()),
            documents: retrieval
                .as_ref()
                .map(|r| r.bundle.documents().to_vec())
                .unwrap_or_default(),
        };

        let answer = compose_answer(answer, retrieval.is_some(), web.is_some(), &source_summary);

        info!(
            run_id = %request.run_id,
            degraded,
            documents = source_summary.documents.len(),
            "Synthesis complete"
        );

        Ok(PipelineResult {
            run_id: request.run_id,
            company_id: request.company_id().clone(),
            answer,
            source_summary,
            stage_timings: StageTimings::default(),
            degraded,
            errors,
            completed_at: Utc::now(),
        })
    }
}

/// Model answer, a missing-source note when degraded, then the sources list.
fn compose_answer(
    model_answer: String,
    used_documents: bool,
    used_web: bool,
    sources: &SourceSummary,
) -> String {
    let mut answer = model_answer.trim_end().to_string();

    if !used_web {
        answer.push_str("\n\n");
        answer.push_str(WEB_UNAVAILABLE_NOTE);
    } else if !used_documents {
        answer.push_str("\n\n");
        answer.push_str(DOCUMENTS_UNAVAILABLE_NOTE);
    }

    let sources = sources.to_markdown();
    if !sources.is_empty() {
        answer.push_str("\n\n");
        answer.push_str(&sources);
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::MockDocumentProvider;
    use crate::models::{CompanyContext, CompanyId, StageKind};
    use crate::providers::mock::transient_error;
    use crate::providers::MockSynthesisModel;

    fn request() -> PipelineRequest {
        PipelineRequest::new(
            CompanyContext::new("airbus", "Airbus SE"),
            "Outlook?",
            Vec::new().into(),
        )
    }

    fn retrieval_ok() -> std::result::Result<RetrievalOutput, StageError> {
        Ok(RetrievalOutput {
            analysis: "Backlog at record high".to_string(),
            bundle: Arc::new(MockDocumentProvider::sample_bundle(&CompanyId::new("airbus"))),
        })
    }

    fn web_err() -> std::result::Result<String, StageError> {
        Err(StageError::WebSearchFailed {
            reason: "down".to_string(),
        })
    }

    #[tokio::test]
    async fn test_both_sources_not_degraded() {
        let stage = SynthesisStage::new(Arc::new(MockSynthesisModel::new()), RetryPolicy::fast());
        let result = stage
            .run(&request(), retrieval_ok(), Ok("Shares up 3%".to_string()))
            .await
            .unwrap();

        assert!(!result.degraded);
        assert!(result.errors.is_empty());
        assert!(result.answer.contains("From company documents: Backlog at record high"));
        assert!(result.answer.contains("From current web sources: Shares up 3%"));
        assert!(result.answer.contains("### Sources"));
        assert!(result.source_summary.used_documents && result.source_summary.used_web_search);
        assert_eq!(result.source_summary.documents.len(), 3);
    }

    #[tokio::test]
    async fn test_one_source_failed_is_degraded_with_note() {
        let stage = SynthesisStage::new(Arc::new(MockSynthesisModel::new()), RetryPolicy::fast());
        let result = stage.run(&request(), retrieval_ok(), web_err()).await.unwrap();

        assert!(result.degraded);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage(), StageKind::WebSearch);
        assert!(result.answer.contains("current web information was unavailable"));
        assert!(!result.source_summary.used_web_search);
    }

    #[tokio::test]
    async fn test_documents_missing_note() {
        let stage = SynthesisStage::new(Arc::new(MockSynthesisModel::new()), RetryPolicy::fast());
        let retrieval = Err(StageError::DocumentUnavailable {
            company_id: "airbus".to_string(),
            reason: "none".to_string(),
        });
        let result = stage
            .run(&request(), retrieval, Ok("findings".to_string()))
            .await
            .unwrap();

        assert!(result.degraded);
        assert!(result.answer.contains("company documents were unavailable"));
        assert!(result.source_summary.bundle_fingerprint.is_none());
    }

    #[tokio::test]
    async fn test_both_failed_skips_model() {
        let model = Arc::new(MockSynthesisModel::new());
        let stage = SynthesisStage::new(model.clone(), RetryPolicy::fast());
        let retrieval = Err(StageError::AnalysisFailed {
            reason: "boom".to_string(),
        });

        let err = stage.run(&request(), retrieval, web_err()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AllSourcesFailed { .. }));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_carries_upstream_errors() {
        let model = Arc::new(MockSynthesisModel::new().always_fail(transient_error("anthropic")));
        let stage = SynthesisStage::new(model.clone(), RetryPolicy::fast());

        let err = stage.run(&request(), retrieval_ok(), web_err()).await.unwrap_err();
        match err {
            OrchestrationError::SynthesisFailed { upstream, .. } => {
                assert_eq!(upstream.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(model.call_count(), 2);
    }
}
