//! Bounded conversation session for one company
//!
//! Holds the most recent exchanges, oldest first, dropping from the front
//! once capacity is reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::{CompanyId, Exchange, HistorySnapshot};

/// Hard cap on exchanges kept per company
pub const MAX_HISTORY_EXCHANGES: usize = 5;

/// Conversation history for a single company
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub company_id: CompanyId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    capacity: usize,
    exchanges: VecDeque<Exchange>,
}

impl ConversationSession {
    /// Create an empty session; capacity is clamped to `1..=MAX_HISTORY_EXCHANGES`.
    pub fn new(company_id: CompanyId, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HISTORY_EXCHANGES);
        let now = Utc::now();

        Self {
            company_id,
            created_at: now,
            updated_at: now,
            capacity,
            exchanges: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an exchange, evicting the oldest ones beyond capacity.
    ///
    /// Returns how many exchanges were evicted.
    pub fn append(&mut self, exchange: Exchange) -> usize {
        self.exchanges.push_back(exchange);

        let mut evicted = 0;
        while self.exchanges.len() > self.capacity {
            self.exchanges.pop_front();
            evicted += 1;
        }

        self.updated_at = Utc::now();
        evicted
    }

    /// Owned copy of the current exchanges, oldest first.
    pub fn snapshot(&self) -> HistorySnapshot {
        self.exchanges.iter().cloned().collect::<Vec<_>>().into()
    }

    pub fn exchanges(&self) -> impl DoubleEndedIterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Render a history snapshot for inclusion in a model prompt.
pub fn format_history(history: &[Exchange]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut context = String::new();
    context.push_str("## Conversation History\n\n");

    for exchange in history {
        context.push_str(&format!(
            "**User** ({}): {}\n\n**Assistant**: {}\n\n",
            exchange.timestamp.format("%H:%M:%S"),
            exchange.query,
            exchange.answer
        ));
    }

    context
}

/// Empty snapshot shared by every company without history.
pub fn empty_snapshot() -> HistorySnapshot {
    Arc::from(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_caps_at_five() {
        let mut session = ConversationSession::new(CompanyId::new("4742"), MAX_HISTORY_EXCHANGES);

        for i in 0..8 {
            session.append(Exchange::new(format!("Question {}", i), "Answer"));
        }

        assert_eq!(session.len(), 5);
        let first = session.exchanges().next().unwrap();
        assert_eq!(first.query, "Question 3");
    }

    #[test]
    fn test_append_reports_evictions() {
        let mut session = ConversationSession::new(CompanyId::new("4742"), 2);
        assert_eq!(session.append(Exchange::new("a", "1")), 0);
        assert_eq!(session.append(Exchange::new("b", "2")), 0);
        assert_eq!(session.append(Exchange::new("c", "3")), 1);
    }

    #[test]
    fn test_capacity_is_clamped() {
        let session = ConversationSession::new(CompanyId::new("4742"), 50);
        assert_eq!(session.capacity(), MAX_HISTORY_EXCHANGES);

        let session = ConversationSession::new(CompanyId::new("4742"), 0);
        assert_eq!(session.capacity(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut session = ConversationSession::new(CompanyId::new("4742"), 5);
        session.append(Exchange::new("What was Q3 revenue?", "EUR 15.7bn"));

        let snapshot = session.snapshot();
        session.append(Exchange::new("And margins?", "8.2%"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_format_history() {
        let history = vec![Exchange::new("What is the order backlog?", "8,658 aircraft")];
        let formatted = format_history(&history);
        assert!(formatted.contains("## Conversation History"));
        assert!(formatted.contains("What is the order backlog?"));
        assert!(formatted.contains("8,658 aircraft"));

        assert!(format_history(&[]).is_empty());
    }
}
