//! Anthropic Claude synthesis client
//!
//! Calls the Messages API (https://api.anthropic.com/v1/messages).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{error_from_response, http_client, SynthesisModel};
use crate::error::ModelError;
use crate::models::Exchange;
use crate::prompts::synthesis_prompt;

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<MessageBody>,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

pub struct AnthropicSynthesisModel {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicSynthesisModel {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SynthesisModel for AnthropicSynthesisModel {
    async fn combine(
        &self,
        analysis: Option<&str>,
        web: Option<&str>,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::NotConfigured {
                provider: PROVIDER.to_string(),
            });
        }

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![MessageBody {
                role: "user",
                content: synthesis_prompt(analysis, web, query, history),
            }],
        };

        tracing::debug!(model = %self.model, "Sending Anthropic API request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::from_reqwest(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        let api_response: MessagesResponse = response.json().await.map_err(|e| ModelError::Parse {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        })?;

        let content = api_response
            .content
            .into_iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse {
                provider: PROVIDER.to_string(),
            });
        }
        Ok(content)
    }
}
