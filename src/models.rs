//! Core data models for the financial insights pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StageError;

//
// ================= Company =================
//

/// Opaque company identifier (the document provider's id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(Arc<str>);

impl CompanyId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CompanyId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Resolved company plus the display context the web search stage needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyContext {
    pub id: CompanyId,
    pub display_name: String,
    pub isin: Option<String>,
}

impl CompanyContext {
    pub fn new(id: impl Into<CompanyId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            isin: None,
        }
    }

    pub fn with_isin(mut self, isin: impl Into<String>) -> Self {
        self.isin = Some(isin.into());
        self
    }
}

//
// ================= Conversation =================
//

/// One answered question. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub exchange_id: Uuid,
    pub query: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            exchange_id: Uuid::new_v4(),
            query: query.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Read-only copy of a company's history taken at one point in time.
pub type HistorySnapshot = Arc<[Exchange]>;

//
// ================= Documents =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Transcript,
    Report,
    Slides,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Transcript => "transcript",
            DocumentKind::Report => "report",
            DocumentKind::Slides => "slides",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized reference to a stored company document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Storage key, unique within a bundle
    pub key: String,
    pub kind: DocumentKind,
    pub event_title: String,
    pub event_date: Option<String>,
    pub url: String,
    pub mime_type: String,
}

/// Documents fetched for one company. Shared read-only by all requesters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentBundle {
    pub company_id: CompanyId,
    documents: Vec<DocumentRef>,
    pub fetched_at: DateTime<Utc>,
}

impl DocumentBundle {
    /// Build a bundle; documents with a repeated storage key are dropped.
    pub fn new(company_id: CompanyId, documents: Vec<DocumentRef>) -> Self {
        let mut unique: Vec<DocumentRef> = Vec::with_capacity(documents.len());
        for doc in documents {
            if !unique.iter().any(|d| d.key == doc.key) {
                unique.push(doc);
            }
        }

        Self {
            company_id,
            documents: unique,
            fetched_at: Utc::now(),
        }
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn count_of(&self, kind: DocumentKind) -> usize {
        self.documents.iter().filter(|d| d.kind == kind).count()
    }

    /// SHA256 over the sorted storage keys, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut keys: Vec<&str> = self.documents.iter().map(|d| d.key.as_str()).collect();
        keys.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(self.company_id.as_str().as_bytes());
        for key in keys {
            hasher.update(b"\n");
            hasher.update(key.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

//
// ================= Pipeline =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Retrieval,
    WebSearch,
    Synthesis,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageKind::Retrieval => "retrieval",
            StageKind::WebSearch => "web_search",
            StageKind::Synthesis => "synthesis",
        };
        f.write_str(s)
    }
}

/// Orchestrator run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Dispatched,
    Joining,
    Synthesizing,
    Done,
    Failed,
}

/// Immutable input shared by every stage of one run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub run_id: Uuid,
    pub company: CompanyContext,
    pub query: String,
    pub history: HistorySnapshot,
}

impl PipelineRequest {
    pub fn new(
        company: CompanyContext,
        query: impl Into<String>,
        history: HistorySnapshot,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            company,
            query: query.into(),
            history,
        }
    }

    pub fn company_id(&self) -> &CompanyId {
        &self.company.id
    }
}

/// Wall-clock time spent in each stage, in milliseconds.
///
/// A stage cut off by the join deadline reports the time until the deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub retrieval_ms: Option<u64>,
    pub web_search_ms: Option<u64>,
    pub synthesis_ms: Option<u64>,
    pub total_ms: u64,
}

/// Which sources fed the answer, and the documents behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub used_documents: bool,
    pub used_web_search: bool,
    pub bundle_fingerprint: Option<String>,
    pub documents: Vec<DocumentRef>,
}

impl SourceSummary {
    /// Numbered markdown list of the documents behind the answer.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if self.documents.is_empty() && !self.used_web_search {
            return out;
        }

        out.push_str("### Sources\n");
        for (i, doc) in self.documents.iter().enumerate() {
            let name = doc.key.rsplit('/').next().unwrap_or(&doc.key);
            out.push_str(&format!("{}. [{}]({})", i + 1, name, doc.url));
            if let Some(date) = &doc.event_date {
                out.push_str(&format!(" ({}, {})", doc.kind, date));
            }
            out.push('\n');
        }
        if self.used_web_search {
            out.push_str(&format!("{}. Live web search\n", self.documents.len() + 1));
        }
        out
    }
}

/// Final output of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub company_id: CompanyId,
    pub answer: String,
    pub source_summary: SourceSummary,
    pub stage_timings: StageTimings,
    /// True when the answer was built from fewer than all sources
    pub degraded: bool,
    pub errors: Vec<StageError>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, kind: DocumentKind) -> DocumentRef {
        DocumentRef {
            key: key.to_string(),
            kind,
            event_title: "Q4 2024".to_string(),
            event_date: Some("2025-02-01".to_string()),
            url: format!("https://files.example.com/{}", key),
            mime_type: "application/pdf".to_string(),
        }
    }

    #[test]
    fn test_bundle_drops_duplicate_keys() {
        let bundle = DocumentBundle::new(
            CompanyId::new("4742"),
            vec![
                doc("airbus/report/a.pdf", DocumentKind::Report),
                doc("airbus/report/a.pdf", DocumentKind::Report),
                doc("airbus/slides/b.pdf", DocumentKind::Slides),
            ],
        );
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.count_of(DocumentKind::Report), 1);
    }

    #[test]
    fn test_fingerprint_ignores_document_order() {
        let a = DocumentBundle::new(
            CompanyId::new("4742"),
            vec![
                doc("x/report/1.pdf", DocumentKind::Report),
                doc("x/slides/2.pdf", DocumentKind::Slides),
            ],
        );
        let b = DocumentBundle::new(
            CompanyId::new("4742"),
            vec![
                doc("x/slides/2.pdf", DocumentKind::Slides),
                doc("x/report/1.pdf", DocumentKind::Report),
            ],
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_sources_markdown() {
        let summary = SourceSummary {
            used_documents: true,
            used_web_search: true,
            bundle_fingerprint: None,
            documents: vec![doc("airbus/report/airbus_20250201_report.pdf", DocumentKind::Report)],
        };
        let md = summary.to_markdown();
        assert!(md.starts_with("### Sources\n"));
        assert!(md.contains(
            "1. [airbus_20250201_report.pdf]\
             (https://files.example.com/airbus/report/airbus_20250201_report.pdf)"
        ));
        assert!(md.contains("2. Live web search"));
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::WebSearch.to_string(), "web_search");
        assert_eq!(
            serde_json::to_string(&StageKind::Retrieval).unwrap(),
            "\"retrieval\""
        );
    }
}
