//! Error types for the financial insights orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::StageKind;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    // =============================
    // Terminal Pipeline Errors
    // =============================

    /// Neither documents nor web search produced anything to synthesize.
    #[error("All sources failed: {}", describe_failures(.failures))]
    AllSourcesFailed { failures: Vec<StageError> },

    /// The reasoning model could not produce a final answer.
    #[error("Synthesis failed: {reason}")]
    SynthesisFailed {
        reason: String,
        upstream: Vec<StageError>,
    },

    // =============================
    // Ambient Errors
    // =============================

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Stages whose failure caused this error, empty for ambient errors.
    pub fn failed_stages(&self) -> Vec<StageKind> {
        match self {
            OrchestrationError::AllSourcesFailed { failures } => {
                failures.iter().map(StageError::stage).collect()
            }
            OrchestrationError::SynthesisFailed { upstream, .. } => upstream
                .iter()
                .map(StageError::stage)
                .chain(std::iter::once(StageKind::Synthesis))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True for the two failures that end a pipeline run without an answer.
    pub fn is_terminal_pipeline_failure(&self) -> bool {
        matches!(
            self,
            OrchestrationError::AllSourcesFailed { .. } | OrchestrationError::SynthesisFailed { .. }
        )
    }
}

fn describe_failures(failures: &[StageError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a single retrieval or web search stage.
///
/// These are recoverable at pipeline level: one failing stage yields a
/// degraded answer, two failing stages yield [`OrchestrationError::AllSourcesFailed`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    #[error("Documents unavailable for {company_id}: {reason}")]
    DocumentUnavailable { company_id: String, reason: String },

    #[error("Document analysis failed: {reason}")]
    AnalysisFailed { reason: String },

    #[error("Web search failed: {reason}")]
    WebSearchFailed { reason: String },

    #[error("{stage} timed out after {after_ms} ms")]
    Timeout { stage: StageKind, after_ms: u64 },
}

impl StageError {
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::DocumentUnavailable { .. } | StageError::AnalysisFailed { .. } => {
                StageKind::Retrieval
            }
            StageError::WebSearchFailed { .. } => StageKind::WebSearch,
            StageError::Timeout { stage, .. } => *stage,
        }
    }
}

/// Outcome of a failed document fetch.
///
/// Cloned to every waiter of a single-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("No documents found for {0}")]
    NoDocuments(String),

    #[error("Document provider error: {0}")]
    Provider(String),

    #[error("Document storage error: {0}")]
    Storage(String),

    #[error("Document fetch aborted: {0}")]
    Aborted(String),

    #[error("Document not found: {0}")]
    NotFound(String),
}

/// Failure of a language or search model call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("{provider} request timed out")]
    Timeout { provider: String },

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: String },

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },

    #[error("{provider} response could not be parsed: {message}")]
    Parse { provider: String, message: String },

    #[error("{provider} API key not configured")]
    NotConfigured { provider: String },

    #[error("{provider} received no documents it can read")]
    NoUsableDocuments { provider: String },
}

impl ModelError {
    /// Transient failures are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Timeout { .. }
            | ModelError::Transport { .. }
            | ModelError::RateLimited { .. }
            | ModelError::EmptyResponse { .. } => true,
            ModelError::Api { status, .. } => *status >= 500,
            ModelError::Parse { .. }
            | ModelError::NotConfigured { .. }
            | ModelError::NoUsableDocuments { .. } => false,
        }
    }

    /// Map a reqwest failure into the model taxonomy.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_decode() {
            ModelError::Parse {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            ModelError::Transport {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Company not found: {0}")]
    NotFound(String),

    #[error("Company directory unavailable: {0}")]
    Unavailable(String),
}
