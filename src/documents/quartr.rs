//! Quartr-backed document provider
//!
//! Pulls the company's recent events, keeps up to two of each document
//! kind (newest first), normalizes their storage keys and records the
//! resulting bundle in a [`DocumentStore`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{DocumentProvider, DocumentStore};
use crate::error::DocumentError;
use crate::models::{CompanyId, DocumentBundle, DocumentKind, DocumentRef};

const QUARTR_BASE_URL: &str = "https://api.quartr.com/public/v1";
const EVENT_PAGE_SIZE: u32 = 10;
const PER_KIND_LIMIT: usize = 2;

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    data: Vec<QuartrEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuartrEvent {
    #[serde(default)]
    event_title: Option<String>,
    #[serde(default)]
    event_date: Option<String>,
    #[serde(default)]
    transcript_url: Option<String>,
    #[serde(default)]
    report_url: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyInfo {
    display_name: Option<String>,
}

/// Document provider over the Quartr public API
pub struct QuartrDocumentProvider {
    client: Client,
    api_key: String,
    base_url: String,
    store: Arc<dyn DocumentStore>,
}

impl QuartrDocumentProvider {
    pub fn new(api_key: String, store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            base_url: QUARTR_BASE_URL.to_string(),
            store,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn company_name(&self, company_id: &CompanyId) -> String {
        let fallback = format!("Company-{}", company_id);
        let url = format!("{}/companies/{}", self.base_url, company_id);

        let request = self.client.get(&url).header("X-Api-Key", &self.api_key);
        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            _ => return fallback,
        };

        match response.json::<CompanyInfo>().await {
            Ok(info) => info.display_name.unwrap_or(fallback),
            Err(_) => fallback,
        }
    }

    async fn earlier_events(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<QuartrEvent>, DocumentError> {
        let url = format!("{}/companies/{}/earlier-events", self.base_url, company_id);

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&[("limit", EVENT_PAGE_SIZE), ("page", 1)])
            .send()
            .await
            .map_err(|e| DocumentError::Provider(format!("Quartr request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                company_id = %company_id,
                status = status.as_u16(),
                "Quartr events request failed"
            );
            return Err(DocumentError::Provider(format!(
                "Quartr returned {}: {}",
                status, body
            )));
        }

        let page: EventsPage = response.json().await.map_err(|e| {
            DocumentError::Provider(format!("Quartr response could not be parsed: {}", e))
        })?;

        Ok(page.data)
    }
}

#[async_trait]
impl DocumentProvider for QuartrDocumentProvider {
    async fn fetch_and_normalize(
        &self,
        company_id: &CompanyId,
    ) -> Result<DocumentBundle, DocumentError> {
        if self.api_key.is_empty() {
            return Err(DocumentError::Provider("QUARTR_API_KEY not configured".to_string()));
        }

        let company_name = self.company_name(company_id).await;
        let events = self.earlier_events(company_id).await?;
        let documents = select_documents(&company_name, events);

        if documents.is_empty() {
            return Err(DocumentError::NoDocuments(company_id.to_string()));
        }

        let bundle = DocumentBundle::new(company_id.clone(), documents);
        self.store.put(&bundle).await?;

        info!(
            company_id = %company_id,
            company_name = %company_name,
            transcripts = bundle.count_of(DocumentKind::Transcript),
            reports = bundle.count_of(DocumentKind::Report),
            slides = bundle.count_of(DocumentKind::Slides),
            "Company documents normalized"
        );

        Ok(bundle)
    }
}

/// Newest events first, at most two documents of each kind.
fn select_documents(company_name: &str, mut events: Vec<QuartrEvent>) -> Vec<DocumentRef> {
    events.sort_by(|a, b| b.event_date.cmp(&a.event_date));

    let mut documents = Vec::new();
    let mut counts = [0usize; 3];

    for event in events {
        if counts.iter().all(|c| *c >= PER_KIND_LIMIT) {
            break;
        }

        let date = event
            .event_date
            .as_deref()
            .map(|d| d.split('T').next().unwrap_or(d).to_string());
        let title = event.event_title.clone().unwrap_or_default();

        let candidates = [
            (DocumentKind::Transcript, &event.transcript_url),
            (DocumentKind::Report, &event.report_url),
            (DocumentKind::Slides, &event.pdf_url),
        ];

        for (slot, (kind, url)) in candidates.into_iter().enumerate() {
            let Some(url) = url.as_deref().filter(|u| !u.is_empty()) else {
                continue;
            };
            if counts[slot] >= PER_KIND_LIMIT {
                continue;
            }

            documents.push(DocumentRef {
                key: storage_key(company_name, date.as_deref().unwrap_or(""), kind, url),
                kind,
                event_title: title.clone(),
                event_date: date.clone(),
                url: url.to_string(),
                mime_type: mime_type_for(url).to_string(),
            });
            counts[slot] += 1;
        }
    }

    documents
}

/// `company/kind/company_date_kind.ext`, extension taken from the source url.
pub fn storage_key(
    company_name: &str,
    event_date: &str,
    kind: DocumentKind,
    source_url: &str,
) -> String {
    let company = company_name.to_lowercase().replace([' ', '-'], "_");
    let date = event_date.replace('-', "");
    let ext = extension_of(source_url).unwrap_or("pdf");

    format!("{company}/{kind}/{company}_{date}_{kind}.{ext}")
}

/// MIME type implied by the url's extension. Extensionless urls are
/// transcript pages and treated as HTML.
pub fn mime_type_for(url: &str) -> &'static str {
    match extension_of(url).map(str::to_ascii_lowercase).as_deref() {
        Some("pdf") => "application/pdf",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") | None => "text/html",
        Some(_) => "application/octet-stream",
    }
}

fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::InMemoryDocumentStore;

    fn event(date: &str, transcript: bool, report: bool, slides: bool) -> QuartrEvent {
        QuartrEvent {
            event_title: Some(format!("Results {}", date)),
            event_date: Some(format!("{}T08:00:00Z", date)),
            transcript_url: transcript.then(|| format!("https://app.quartr.com/t/{}", date)),
            report_url: report.then(|| format!("https://files.quartr.com/r/{}.pdf", date)),
            pdf_url: slides.then(|| format!("https://files.quartr.com/s/{}.pptx", date)),
        }
    }

    #[test]
    fn test_storage_key_format() {
        assert_eq!(
            storage_key("Airbus SE", "2025-02-20", DocumentKind::Report, "https://x/y/report.pdf"),
            "airbus_se/report/airbus_se_20250220_report.pdf"
        );
        assert_eq!(
            storage_key(
                "A2A-S.p.A.",
                "2024-11-05",
                DocumentKind::Transcript,
                "https://app.quartr.com/t/1"
            ),
            "a2a_s.p.a./transcript/a2a_s.p.a._20241105_transcript.pdf"
        );
        assert_eq!(
            storage_key("ASML", "2025-01-29", DocumentKind::Slides, "https://x/deck.pptx?sig=abc"),
            "asml/slides/asml_20250129_slides.pptx"
        );
    }

    #[test]
    fn test_select_keeps_two_newest_per_kind() {
        let events = vec![
            event("2024-07-25", true, true, true),
            event("2025-02-20", true, true, false),
            event("2024-10-30", true, false, true),
            event("2024-04-25", true, true, true),
        ];

        let docs = select_documents("Airbus SE", events);
        let dates = |kind: DocumentKind| -> Vec<String> {
            docs.iter()
                .filter(|d| d.kind == kind)
                .filter_map(|d| d.event_date.clone())
                .collect()
        };

        assert_eq!(dates(DocumentKind::Transcript), vec!["2025-02-20", "2024-10-30"]);
        assert_eq!(dates(DocumentKind::Report), vec!["2025-02-20", "2024-07-25"]);
        assert_eq!(dates(DocumentKind::Slides), vec!["2024-10-30", "2024-07-25"]);
    }

    #[test]
    fn test_select_empty_events() {
        assert!(select_documents("Airbus SE", vec![]).is_empty());
        let bare = vec![event("2025-01-01", false, false, false)];
        assert!(select_documents("Airbus SE", bare).is_empty());
    }

    #[test]
    fn test_documents_carry_their_real_mime_type() {
        let docs = select_documents("Airbus SE", vec![event("2025-02-20", true, true, true)]);
        let mime = |kind: DocumentKind| {
            docs.iter()
                .find(|d| d.kind == kind)
                .map(|d| d.mime_type.clone())
                .unwrap()
        };

        assert_eq!(mime(DocumentKind::Transcript), "text/html");
        assert_eq!(mime(DocumentKind::Report), "application/pdf");
        assert_eq!(
            mime(DocumentKind::Slides),
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        );
        assert_eq!(mime_type_for("https://x/notes.TXT?v=2"), "text/plain");
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_network() {
        let provider = QuartrDocumentProvider::new(
            String::new(),
            Arc::new(InMemoryDocumentStore::new()),
            Duration::from_secs(1),
        );
        let err = provider.fetch_and_normalize(&CompanyId::new("4742")).await.unwrap_err();
        assert!(matches!(err, DocumentError::Provider(_)));
    }
}
