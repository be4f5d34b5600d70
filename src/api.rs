//! REST API server for the financial insights orchestrator
//!
//! Resolves company names through the directory and exposes
//! `Orchestrator::handle` plus the company-switch reset over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::directory::CompanyDirectory;
use crate::error::{DirectoryError, OrchestrationError};
use crate::models::CompanyContext;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    /// Company display name as listed by the directory
    pub company: String,
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwitchCompanyRequest {
    pub company: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn error_with<T: Serialize>(message: String, data: T) -> Self {
        Self {
            data: serde_json::to_value(data).ok(),
            ..Self::error(message)
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub directory: Arc<dyn CompanyDirectory>,
}

impl ApiState {
    async fn resolve(&self, name: &str) -> Result<CompanyContext, ApiResult> {
        self.directory.resolve(name).await.map_err(|e| {
            let status = match e {
                DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
                DirectoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(ApiResponse::error(e.to_string())))
        })
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let query = req.query.trim();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Query must not be empty".into())),
        );
    }

    let company = match state.resolve(&req.company).await {
        Ok(company) => company,
        Err(response) => return response,
    };

    info!(company_id = %company.id, "Received chat request");

    match state.orchestrator.handle(&company, query).await {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) if e.is_terminal_pipeline_failure() => {
            warn!(company_id = %company.id, error = %e, "Pipeline produced no answer");
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error_with(
                    e.to_string(),
                    serde_json::json!({ "failed_stages": e.failed_stages() }),
                )),
            )
        }
        Err(e) => (
            status_for(&e),
            Json(ApiResponse::error(format!("Chat request failed: {}", e))),
        ),
    }
}

fn status_for(err: &OrchestrationError) -> StatusCode {
    match err {
        OrchestrationError::Directory(DirectoryError::NotFound(_)) => StatusCode::NOT_FOUND,
        OrchestrationError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Company Endpoints
/// =============================

async fn switch_company(
    State(state): State<ApiState>,
    Json(req): Json<SwitchCompanyRequest>,
) -> ApiResult {
    let company = match state.resolve(&req.company).await {
        Ok(company) => company,
        Err(response) => return response,
    };

    state.orchestrator.reset(&company.id).await;
    (StatusCode::OK, Json(ApiResponse::success(company)))
}

async fn list_companies(State(state): State<ApiState>) -> ApiResult {
    match state.directory.list().await {
        Ok(companies) => (StatusCode::OK, Json(ApiResponse::success(companies))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn history(State(state): State<ApiState>, Path(company): Path<String>) -> ApiResult {
    let company = match state.resolve(&company).await {
        Ok(company) => company,
        Err(response) => return response,
    };

    let history = state.orchestrator.history(&company.id).await;
    (StatusCode::OK, Json(ApiResponse::success(&*history)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(
    orchestrator: Arc<Orchestrator>,
    directory: Arc<dyn CompanyDirectory>,
) -> Router {
    let state = ApiState {
        orchestrator,
        directory,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/companies", get(list_companies))
        .route("/api/company/switch", post(switch_company))
        .route("/api/history/:company", get(history))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    directory: Arc<dyn CompanyDirectory>,
    port: u16,
) -> crate::Result<()> {
    let router = create_router(orchestrator, directory);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::directory::StaticCompanyDirectory;
    use crate::documents::MockDocumentProvider;
    use crate::providers::mock::permanent_error;
    use crate::providers::{MockAnalysisModel, MockSynthesisModel, MockWebSearchModel};
    use crate::retry::RetryPolicy;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router(analysis: MockAnalysisModel, web: MockWebSearchModel) -> (Router, Arc<Orchestrator>) {
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::default().with_retry(RetryPolicy::fast()),
            Arc::new(MockDocumentProvider::new()),
            Arc::new(analysis),
            Arc::new(web),
            Arc::new(MockSynthesisModel::new()),
        ));
        let app = create_router(
            Arc::clone(&orchestrator),
            Arc::new(StaticCompanyDirectory::sample()),
        );
        (app, orchestrator)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_body(response: axum::response::Response) -> ApiResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_then_history() {
        let (app, _) = router(MockAnalysisModel::new(), MockWebSearchModel::new());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/chat",
                serde_json::json!({"company": "Airbus SE", "query": "Outlook?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_body(response).await;
        assert!(body.success);
        assert_eq!(body.data.unwrap()["degraded"], false);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/history/airbus%20se")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_body(response).await;
        assert_eq!(body.data.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_company_is_404() {
        let (app, _) = router(MockAnalysisModel::new(), MockWebSearchModel::new());
        let response = app
            .oneshot(post_json(
                "/api/chat",
                serde_json::json!({"company": "Acme Corp", "query": "Outlook?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_all_sources_failed_is_502_with_stages() {
        let (app, _) = router(
            MockAnalysisModel::new().always_fail(permanent_error("gemini")),
            MockWebSearchModel::new().always_fail(permanent_error("perplexity")),
        );
        let response = app
            .oneshot(post_json(
                "/api/chat",
                serde_json::json!({"company": "Airbus SE", "query": "Outlook?"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = read_body(response).await;
        assert!(!body.success);
        assert_eq!(
            body.data.unwrap()["failed_stages"],
            serde_json::json!(["retrieval", "web_search"])
        );
    }

    #[tokio::test]
    async fn test_switch_company_resets_history() {
        let (app, orchestrator) = router(MockAnalysisModel::new(), MockWebSearchModel::new());
        let company = StaticCompanyDirectory::sample().resolve("ASML Holding NV").await.unwrap();
        orchestrator.handle(&company, "Q1").await.unwrap();
        assert_eq!(orchestrator.history(&company.id).await.len(), 1);

        let response = app
            .oneshot(post_json(
                "/api/company/switch",
                serde_json::json!({"company": "ASML Holding NV"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(orchestrator.history(&company.id).await.is_empty());
    }
}
