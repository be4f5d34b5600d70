use financial_insights_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    config,
    directory::{CompanyDirectory, PgCompanyDirectory, StaticCompanyDirectory},
    documents::{InMemoryDocumentStore, QuartrDocumentProvider},
    providers::{AnthropicSynthesisModel, GeminiAnalysisModel, PerplexityWebSearchModel},
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::init_tracing();

    let (orchestrator_config, providers) = config::load()?;

    info!("Financial Insights Orchestrator - API Server");
    info!("Port: {}", providers.port);

    for (name, key) in [
        ("GEMINI_API_KEY", &providers.gemini_api_key),
        ("PERPLEXITY_API_KEY", &providers.perplexity_api_key),
        ("ANTHROPIC_API_KEY", &providers.anthropic_api_key),
        ("QUARTR_API_KEY", &providers.quartr_api_key),
    ] {
        if key.is_empty() {
            warn!("{} not set; calls to that provider will fail", name);
        }
    }

    let directory: Arc<dyn CompanyDirectory> = match &providers.database_url {
        Some(url) => Arc::new(PgCompanyDirectory::connect_lazy(url)?),
        None => {
            info!("DATABASE_URL not set, using built-in company list");
            Arc::new(StaticCompanyDirectory::sample())
        }
    };

    let documents = QuartrDocumentProvider::new(
        providers.quartr_api_key.clone(),
        Arc::new(InMemoryDocumentStore::new()),
        providers.model_timeout,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        orchestrator_config,
        Arc::new(documents),
        Arc::new(GeminiAnalysisModel::new(
            providers.gemini_api_key.clone(),
            providers.gemini_model.clone(),
            providers.model_timeout,
        )),
        Arc::new(PerplexityWebSearchModel::new(
            providers.perplexity_api_key.clone(),
            providers.perplexity_model.clone(),
            providers.model_timeout,
        )),
        Arc::new(AnthropicSynthesisModel::new(
            providers.anthropic_api_key.clone(),
            providers.anthropic_model.clone(),
            providers.model_timeout,
        )),
    ));

    info!("Orchestrator initialized, starting API server");

    start_server(orchestrator, directory, providers.port).await?;

    Ok(())
}
