//! Perplexity web search client
//!
//! Perplexity exposes an OpenAI-compatible chat completions endpoint; the
//! `sonar` models ground their answers in a live web search.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{error_from_response, http_client, WebSearchModel};
use crate::error::ModelError;
use crate::models::{CompanyContext, Exchange};
use crate::prompts::web_search_prompt;

const PROVIDER: &str = "perplexity";
const DEFAULT_API_BASE: &str = "https://api.perplexity.ai";

pub struct PerplexityWebSearchModel {
    client: Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl PerplexityWebSearchModel {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key,
            model,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[async_trait]
impl WebSearchModel for PerplexityWebSearchModel {
    async fn search(
        &self,
        company: &CompanyContext,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::NotConfigured {
                provider: PROVIDER.to_string(),
            });
        }

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: web_search_prompt(company, query, history),
            }],
            temperature: 0.2,
        };

        debug!(company_id = %company.id, model = %self.model, "Sending Perplexity request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::from_reqwest(PROVIDER, e))?;

        if !response.status().is_success() {
            let err = error_from_response(PROVIDER, response).await;
            error!(error = %err, "Perplexity API error response");
            return Err(err);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| ModelError::Parse {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        })?;

        render_findings(parsed)
    }
}

/// Answer text followed by a numbered list of cited urls, if any.
fn render_findings(response: ChatResponse) -> Result<String, ModelError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ModelError::EmptyResponse {
            provider: PROVIDER.to_string(),
        })?;

    if response.citations.is_empty() {
        return Ok(content);
    }

    let mut out = content;
    out.push_str("\n\nWeb citations:\n");
    for (i, url) in response.citations.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, url));
    }
    Ok(out)
}
