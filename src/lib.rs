//! Financial Insights Orchestrator
//!
//! Answers questions about a company by combining three sources:
//! - the company's recent filings (transcripts, reports, slides), analysed by a document model
//! - a live web search
//! - a synthesis pass that merges both into one attributed answer
//!
//! Retrieval and web search run concurrently under a shared deadline.
//! Document fetches are deduplicated per company, and a bounded,
//! per-company conversation history feeds follow-up questions.
//!
//! PIPELINE:
//! INIT → DISPATCHED → JOINING → SYNTHESIZING → DONE | FAILED

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod directory;
pub mod documents;
pub mod error;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod retry;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use models::*;
