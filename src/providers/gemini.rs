//! Gemini document-analysis client
//!
//! Downloads each bundle document and sends it as base64 `inline_data` next
//! to the analyst prompt. Documents Gemini cannot read inline (slide decks,
//! unknown binaries) are skipped. Uses a long-lived reqwest::Client for
//! connection pooling.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{error_from_response, http_client, AnalysisModel};
use crate::error::ModelError;
use crate::models::{DocumentBundle, DocumentRef, Exchange};
use crate::prompts::analysis_prompt;

const PROVIDER: &str = "gemini";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// MIME types Gemini accepts as inline document data
const INLINE_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/html",
    "text/csv",
    "text/markdown",
];

/// Inline payloads share one request, which Gemini caps at 20 MB.
const MAX_INLINE_BYTES: usize = 20 * 1024 * 1024;

fn base_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase()
}

fn is_inline_supported(mime: &str) -> bool {
    INLINE_MIME_TYPES.contains(&base_mime(mime).as_str())
}

/// A downloaded document ready to be inlined
struct InlineDocument {
    mime_type: String,
    data: Vec<u8>,
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiAnalysisModel {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAnalysisModel {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key,
            model,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch one document. `None` when its type cannot be sent inline.
    async fn download(&self, doc: &DocumentRef) -> Result<Option<InlineDocument>, ModelError> {
        if !is_inline_supported(&doc.mime_type) {
            return Ok(None);
        }

        let response = self
            .client
            .get(&doc.url)
            .send()
            .await
            .map_err(|e| ModelError::from_reqwest(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        // The served content type wins over the hint derived from the url.
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(base_mime)
            .unwrap_or_else(|| base_mime(&doc.mime_type));

        if !is_inline_supported(&mime_type) {
            return Ok(None);
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| ModelError::from_reqwest(PROVIDER, e))?;

        Ok(Some(InlineDocument {
            mime_type,
            data: data.to_vec(),
        }))
    }

    /// Download every readable document in the bundle, within the size cap.
    async fn collect_documents(
        &self,
        bundle: &DocumentBundle,
    ) -> Result<Vec<InlineDocument>, ModelError> {
        let mut documents = Vec::new();
        let mut total_bytes = 0usize;
        let mut last_error = None;

        for doc in bundle.documents() {
            match self.download(doc).await {
                Ok(Some(document)) => {
                    if total_bytes + document.data.len() > MAX_INLINE_BYTES {
                        warn!(key = %doc.key, "Inline size limit reached, document skipped");
                        continue;
                    }
                    total_bytes += document.data.len();
                    documents.push(document);
                }
                Ok(None) => {
                    debug!(
                        key = %doc.key,
                        mime_type = %doc.mime_type,
                        "Document not readable inline"
                    );
                }
                Err(e) => {
                    warn!(key = %doc.key, error = %e, "Document download failed, skipped");
                    last_error = Some(e);
                }
            }
        }

        if documents.is_empty() {
            return Err(last_error.unwrap_or(ModelError::NoUsableDocuments {
                provider: PROVIDER.to_string(),
            }));
        }
        Ok(documents)
    }

    fn build_request(documents: &[InlineDocument], prompt: String) -> GeminiRequest {
        let mut parts: Vec<Part> = documents
            .iter()
            .map(|doc| Part::Inline {
                inline_data: InlineData {
                    mime_type: doc.mime_type.clone(),
                    data: BASE64_STANDARD.encode(&doc.data),
                },
            })
            .collect();
        parts.push(Part::Text { text: prompt });

        GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 7000,
            },
        }
    }
}

#[async_trait]
impl AnalysisModel for GeminiAnalysisModel {
    async fn analyze(
        &self,
        bundle: &DocumentBundle,
        query: &str,
        history: &[Exchange],
    ) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::NotConfigured {
                provider: PROVIDER.to_string(),
            });
        }

        let documents = self.collect_documents(bundle).await?;
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let request = Self::build_request(&documents, analysis_prompt(bundle, query, history));

        info!(
            company_id = %bundle.company_id,
            documents = documents.len(),
            model = %self.model,
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                ModelError::from_reqwest(PROVIDER, e)
            })?;

        if !response.status().is_success() {
            let err = error_from_response(PROVIDER, response).await;
            error!(error = %err, "Gemini API error response");
            return Err(err);
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        extract_text(gemini_response)
    }
}

fn extract_text(response: GeminiResponse) -> Result<String, ModelError> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .map(|candidate| {
            candidate
                .content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ModelError::EmptyResponse {
            provider: PROVIDER.to_string(),
        });
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::MockDocumentProvider;
    use crate::models::{CompanyId, DocumentKind};
    use axum::extract::State;
    use axum::http::header;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Option<serde_json::Value>>>;

    fn doc(kind: DocumentKind, url: String, mime_type: &str) -> DocumentRef {
        DocumentRef {
            key: format!("airbus_se/{kind}/airbus_se_20250220_{kind}"),
            kind,
            event_title: "Q4 2024 results".to_string(),
            event_date: Some("2025-02-20".to_string()),
            url,
            mime_type: mime_type.to_string(),
        }
    }

    async fn generate(
        State(captured): State<Captured>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        *captured.lock().unwrap() = Some(body);
        Json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Backlog grew."}]}}]
        }))
    }

    /// Local stand-in for the document host and the Gemini endpoint.
    async fn serve() -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/files/report.pdf",
                get(|| async { ([(header::CONTENT_TYPE, "application/pdf")], "%PDF-1.7 report") }),
            )
            .route(
                "/t/2025-02-20",
                get(|| async {
                    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], "<p>Transcript</p>")
                }),
            )
            .route("/models/:call", post(generate))
            .with_state(Arc::clone(&captured));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), captured)
    }

    fn model(base: &str) -> GeminiAnalysisModel {
        GeminiAnalysisModel::new(
            "test-key".to_string(),
            "gemini-2.0-flash".to_string(),
            Duration::from_secs(5),
        )
        .with_base_url(format!("{}/models", base))
    }

    #[test]
    fn test_request_serialization() {
        let documents = vec![
            InlineDocument {
                mime_type: "text/html".to_string(),
                data: b"<p>Transcript</p>".to_vec(),
            },
            InlineDocument {
                mime_type: "application/pdf".to_string(),
                data: b"%PDF-1.7".to_vec(),
            },
        ];
        let request =
            GeminiAnalysisModel::build_request(&documents, "What is the outlook?".to_string());

        let json = serde_json::to_value(&request).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();

        assert_eq!(parts.len(), 3);
        assert!(parts[0].get("file_data").is_none());
        assert_eq!(parts[0]["inline_data"]["mime_type"], "text/html");
        assert_eq!(
            parts[0]["inline_data"]["data"],
            BASE64_STANDARD.encode(b"<p>Transcript</p>")
        );
        assert_eq!(parts[1]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(parts[2]["text"], "What is the outlook?");
        assert_eq!(json["generation_config"]["max_output_tokens"], 7000);
    }

    #[test]
    fn test_inline_support() {
        assert!(is_inline_supported("application/pdf"));
        assert!(is_inline_supported("Text/HTML; charset=utf-8"));
        assert!(!is_inline_supported(
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        ));
        assert!(!is_inline_supported("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_analyze_inlines_downloaded_documents() {
        let (base, captured) = serve().await;
        let bundle = DocumentBundle::new(
            CompanyId::new("4742"),
            vec![
                doc(DocumentKind::Transcript, format!("{}/t/2025-02-20", base), "text/html"),
                doc(
                    DocumentKind::Report,
                    format!("{}/files/report.pdf", base),
                    "application/pdf",
                ),
                doc(
                    DocumentKind::Slides,
                    format!("{}/files/deck.pptx", base),
                    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                ),
            ],
        );

        let answer = model(&base).analyze(&bundle, "Backlog?", &[]).await.unwrap();
        assert_eq!(answer, "Backlog grew.");

        let body = captured.lock().unwrap().clone().unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap().clone();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inline_data"]["mime_type"], "text/html");
        assert_eq!(
            parts[0]["inline_data"]["data"],
            BASE64_STANDARD.encode("<p>Transcript</p>")
        );
        assert_eq!(parts[1]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(
            parts[1]["inline_data"]["data"],
            BASE64_STANDARD.encode("%PDF-1.7 report")
        );
        assert!(parts[2]["text"].as_str().unwrap().contains("Backlog?"));
    }

    #[tokio::test]
    async fn test_no_readable_documents_skips_model_call() {
        let (base, captured) = serve().await;
        let bundle = DocumentBundle::new(
            CompanyId::new("4742"),
            vec![doc(
                DocumentKind::Slides,
                format!("{}/files/deck.pptx", base),
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            )],
        );

        let err = model(&base).analyze(&bundle, "q", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::NoUsableDocuments { .. }));
        assert!(!err.is_transient());
        assert!(captured.lock().unwrap().is_none());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Revenue "},{"text":"grew."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Revenue grew.");
    }

    #[test]
    fn test_extract_text_empty_is_error() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(
            extract_text(response),
            Err(ModelError::EmptyResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let model = GeminiAnalysisModel::new(
            String::new(),
            "gemini-2.0-flash".to_string(),
            Duration::from_secs(1),
        );
        let bundle = MockDocumentProvider::sample_bundle(&CompanyId::new("airbus"));
        let err = model.analyze(&bundle, "q", &[]).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, ModelError::NotConfigured { .. }));
    }
}
