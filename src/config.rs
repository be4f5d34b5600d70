//! Runtime configuration loaded from the environment
//!
//! `.env` is honoured when present. Missing API keys are not fatal here;
//! the affected provider reports `NotConfigured` when it is first used.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::audit::DEFAULT_RUN_LOG_CAPACITY;
use crate::error::OrchestrationError;
use crate::memory::MAX_HISTORY_EXCHANGES;
use crate::retry::RetryPolicy;
use crate::Result;

/// Pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Overall deadline for the retrieval and web search join
    pub join_deadline: Duration,
    /// Exchanges kept per company, never above five
    pub history_capacity: usize,
    /// Model-call retry policy shared by all stages
    pub retry: RetryPolicy,
    /// Most recent runs kept in the run log
    pub run_log_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            join_deadline: Duration::from_secs(90),
            history_capacity: MAX_HISTORY_EXCHANGES,
            retry: RetryPolicy::default(),
            run_log_capacity: DEFAULT_RUN_LOG_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let join_deadline = parse_var::<u64>("PIPELINE_DEADLINE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.join_deadline);

        let history_capacity = parse_var::<usize>("HISTORY_CAPACITY")?
            .unwrap_or(defaults.history_capacity)
            .clamp(1, MAX_HISTORY_EXCHANGES);

        let retry = match parse_var::<u64>("MODEL_RETRY_BACKOFF_MS")? {
            Some(ms) => RetryPolicy::single_retry(Duration::from_millis(ms)),
            None => defaults.retry,
        };

        let run_log_capacity = parse_var::<usize>("RUN_LOG_CAPACITY")?
            .unwrap_or(defaults.run_log_capacity)
            .max(1);

        Ok(Self {
            join_deadline,
            history_capacity,
            retry,
            run_log_capacity,
        })
    }

    pub fn with_join_deadline(mut self, deadline: Duration) -> Self {
        self.join_deadline = deadline;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_run_log_capacity(mut self, capacity: usize) -> Self {
        self.run_log_capacity = capacity.max(1);
        self
    }
}

/// Credentials and endpoints for the external collaborators
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub perplexity_api_key: String,
    pub perplexity_model: String,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub quartr_api_key: String,
    pub model_timeout: Duration,
    pub database_url: Option<String>,
    pub port: u16,
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(value) => value.parse().map_err(|_| {
                OrchestrationError::Config(format!("PORT must be a port number, got {:?}", value))
            })?,
            Err(_) => 8080,
        };

        let model_timeout = parse_var::<u64>("MODEL_TIMEOUT_SECS")?.unwrap_or(60);

        Ok(Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            perplexity_api_key: env::var("PERPLEXITY_API_KEY").unwrap_or_default(),
            perplexity_model: env::var("PERPLEXITY_MODEL")
                .unwrap_or_else(|_| "sonar-pro".to_string()),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-3-7-sonnet-latest".to_string()),
            quartr_api_key: env::var("QUARTR_API_KEY").unwrap_or_default(),
            model_timeout: Duration::from_secs(model_timeout),
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            port,
        })
    }
}

/// Load `.env` (if present) and both config sections.
pub fn load() -> Result<(OrchestratorConfig, ProviderConfig)> {
    dotenv::dotenv().ok();
    Ok((OrchestratorConfig::from_env()?, ProviderConfig::from_env()?))
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map(Some).map_err(|_| {
            OrchestrationError::Config(format!("{} has an invalid value: {:?}", name, raw))
        }),
        _ => Ok(None),
    }
}
