//! Pipeline stages
//!
//! Retrieval and web search run in parallel and fail independently with a
//! [`StageError`](crate::error::StageError). Synthesis joins whatever they
//! produced into a [`PipelineResult`](crate::models::PipelineResult).

pub mod retrieval;
pub mod synthesis;
pub mod web_search;

pub use retrieval::{RetrievalOutput, RetrievalStage};
pub use synthesis::SynthesisStage;
pub use web_search::WebSearchStage;
