//! Web search stage

use std::sync::Arc;
use tracing::debug;

use crate::error::StageError;
use crate::models::PipelineRequest;
use crate::providers::WebSearchModel;
use crate::retry::RetryPolicy;

pub struct WebSearchStage {
    model: Arc<dyn WebSearchModel>,
    retry: RetryPolicy,
}

impl WebSearchStage {
    pub fn new(model: Arc<dyn WebSearchModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn run(&self, request: &PipelineRequest) -> Result<String, StageError> {
        debug!(run_id = %request.run_id, company_id = %request.company_id(), "Searching the web");

        self.retry
            .execute("web_search", || {
                self.model.search(&request.company, &request.query, &request.history)
            })
            .await
            .map_err(|e| StageError::WebSearchFailed { reason: e.to_string() })
    }
}
