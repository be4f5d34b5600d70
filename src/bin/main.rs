use financial_insights_orchestrator::{
    agent::Orchestrator,
    config::{self, OrchestratorConfig},
    directory::{CompanyDirectory, StaticCompanyDirectory},
    documents::MockDocumentProvider,
    providers::{MockAnalysisModel, MockSynthesisModel, MockWebSearchModel},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::init_tracing();

    info!("Financial Insights Orchestrator starting (mock collaborators)");

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(MockDocumentProvider::new().with_latency(Duration::from_millis(300))),
        Arc::new(MockAnalysisModel::new().with_latency(Duration::from_millis(150))),
        Arc::new(MockWebSearchModel::new().with_latency(Duration::from_millis(100))),
        Arc::new(MockSynthesisModel::new()),
    );

    let directory = StaticCompanyDirectory::sample();
    let airbus = directory.resolve("Airbus SE").await?;
    let asml = directory.resolve("ASML Holding NV").await?;

    let session = [
        (&airbus, "How did the order backlog develop last quarter?"),
        (&airbus, "And what does management expect for deliveries this year?"),
        (&asml, "Summarise the latest guidance."),
    ];

    let mut current = None;
    for (company, query) in session {
        if current != Some(&company.id) {
            orchestrator.reset(&company.id).await;
            current = Some(&company.id);
        }

        let result = orchestrator.handle(company, query).await?;
        let history = orchestrator.history(&company.id).await;

        println!("\n=== {} ===", company.display_name);
        println!("Q: {}", query);
        println!("{}", result.answer);
        println!(
            "Run {} | degraded: {} | history: {} | \
             retrieval {:?} ms, web {:?} ms, synthesis {:?} ms",
            result.run_id,
            result.degraded,
            history.len(),
            result.stage_timings.retrieval_ms,
            result.stage_timings.web_search_ms,
            result.stage_timings.synthesis_ms,
        );
    }

    println!(
        "\nDocument fetches: {} | runs logged: {}",
        orchestrator.document_cache().fetch_count(),
        orchestrator.run_log().len().await
    );

    Ok(())
}
