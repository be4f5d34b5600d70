//! Retrieval stage: documents from the cache, then document analysis.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::documents::DocumentCache;
use crate::error::StageError;
use crate::models::{DocumentBundle, PipelineRequest};
use crate::providers::AnalysisModel;
use crate::retry::RetryPolicy;

/// Analysis text plus the bundle it was derived from.
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    pub analysis: String,
    pub bundle: Arc<DocumentBundle>,
}

pub struct RetrievalStage {
    cache: Arc<DocumentCache>,
    model: Arc<dyn AnalysisModel>,
    retry: RetryPolicy,
}

impl RetrievalStage {
    pub fn new(
        cache: Arc<DocumentCache>,
        model: Arc<dyn AnalysisModel>,
        retry: RetryPolicy,
    ) -> Self {
        Self { cache, model, retry }
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    /// Never calls the analysis model without a bundle.
    pub async fn run(&self, request: &PipelineRequest) -> Result<RetrievalOutput, StageError> {
        let company_id = request.company_id();

        let bundle = self.cache.ensure(company_id).await.map_err(|e| {
            warn!(
                run_id = %request.run_id,
                company_id = %company_id,
                error = %e,
                "Documents unavailable"
            );
            StageError::DocumentUnavailable {
                company_id: company_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(
            run_id = %request.run_id,
            documents = bundle.len(),
            history = request.history.len(),
            "Analyzing company documents"
        );

        let analysis = self
            .retry
            .execute("document_analysis", || {
                self.model.analyze(&bundle, &request.query, &request.history)
            })
            .await
            .map_err(|e| StageError::AnalysisFailed { reason: e.to_string() })?;

        Ok(RetrievalOutput { analysis, bundle })
    }
}
