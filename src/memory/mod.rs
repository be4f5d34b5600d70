//! Conversation memory
//!
//! Bounded per-company history consulted before every pipeline run and
//! written once after a successful synthesis.

pub mod conversation;
pub mod store;

pub use conversation::ConversationStore;
pub use store::{format_history, ConversationSession, MAX_HISTORY_EXCHANGES};
