//! Mock document provider
//!
//! Deterministic bundles with optional latency and scripted failures.
//! Counts every fetch so callers can assert single-flight behaviour.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::DocumentProvider;
use crate::error::DocumentError;
use crate::models::{CompanyId, DocumentBundle, DocumentKind, DocumentRef};

/// Mock document provider for development & testing
#[derive(Debug, Default)]
pub struct MockDocumentProvider {
    latency: Duration,
    fetches: AtomicUsize,
    /// Outcomes consumed in order; an empty queue means success
    failures: Mutex<VecDeque<DocumentError>>,
}

impl MockDocumentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next fetch with `error`. Queued failures are used in order.
    pub fn fail_next(self, error: DocumentError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
        self
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// The bundle this mock returns for `company_id`.
    pub fn sample_bundle(company_id: &CompanyId) -> DocumentBundle {
        let slug = company_id.as_str().to_lowercase();
        let doc = |kind: DocumentKind, date: &str| DocumentRef {
            key: format!("{slug}/{kind}/{slug}_{}_{kind}.pdf", date.replace('-', "")),
            kind,
            event_title: format!("{} results", date),
            event_date: Some(date.to_string()),
            url: format!("https://documents.example.com/{slug}/{kind}/{date}.pdf"),
            mime_type: "application/pdf".to_string(),
        };

        DocumentBundle::new(
            company_id.clone(),
            vec![
                doc(DocumentKind::Transcript, "2025-02-20"),
                doc(DocumentKind::Report, "2025-02-20"),
                doc(DocumentKind::Slides, "2025-02-20"),
            ],
        )
    }
}

#[async_trait]
impl DocumentProvider for MockDocumentProvider {
    async fn fetch_and_normalize(
        &self,
        company_id: &CompanyId,
    ) -> Result<DocumentBundle, DocumentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::info!(company_id = %company_id, "Mock document provider fetching");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());

        match scripted {
            Some(error) => Err(error),
            None => Ok(Self::sample_bundle(company_id)),
        }
    }
}
