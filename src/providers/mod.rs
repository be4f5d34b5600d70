//! Model collaborators
//!
//! Three roles, each behind its own trait so stages can be wired with any
//! backend: document analysis (Gemini), live web search (Perplexity) and
//! synthesis (Claude). Mocks live in [`mock`].

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::ModelError;
use crate::models::{CompanyContext, DocumentBundle, Exchange};

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod perplexity;

pub use anthropic::AnthropicSynthesisModel;
pub use gemini::GeminiAnalysisModel;
pub use mock::{MockAnalysisModel, MockSynthesisModel, MockWebSearchModel};
pub use perplexity::PerplexityWebSearchModel;

/// Answers a query from a company's document bundle.
#[async_trait]
pub trait AnalysisModel: Send + Sync {
    async fn analyze(
        &self,
        bundle: &DocumentBundle,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError>;
}

/// Answers a query from live web sources.
#[async_trait]
pub trait WebSearchModel: Send + Sync {
    async fn search(
        &self,
        company: &CompanyContext,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError>;
}

/// Combines whichever source texts are available into the final answer.
#[async_trait]
pub trait SynthesisModel: Send + Sync {
    async fn combine(
        &self,
        analysis: Option<&str>,
        web: Option<&str>,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError>;
}

/// Pooled HTTP client shared by the provider implementations.
pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a non-success response to a [`ModelError`].
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ModelError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ModelError::RateLimited {
            provider: provider.to_string(),
        };
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".to_string());

    ModelError::Api {
        provider: provider.to_string(),
        status: status.as_u16(),
        message,
    }
}
