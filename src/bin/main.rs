use earnings_quality_orchestrator::{
    agent::{AnalysisRequest, Orchestrator, RunOutcome},
    events::{ChannelSink, OrchestratorEvent},
    execution::NoPacing,
    extraction::{DataShaper, InMemoryTableStore, DEFAULT_FETCH_LIMIT},
    planner::KeywordAnalyzer,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SAMPLE_COMPANY: &str = "00126380";
const SAMPLE_QUERY: &str =
    "Analyze Samsung's earnings quality: any red flags in accruals, cash flow vs net income, and an overall rating?";

async fn sample_orchestrator() -> Orchestrator {
    let store = InMemoryTableStore::new();
    store.seed_samples(SAMPLE_COMPANY).await;

    Orchestrator::new(
        Arc::new(KeywordAnalyzer),
        Arc::new(DataShaper::new(Arc::new(store), DEFAULT_FETCH_LIMIT)),
        Arc::new(NoPacing),
    )
}

/// Run once, logging every published event. Returns the outcome and the
/// number of events seen.
async fn run_logged(
    orchestrator: &Orchestrator,
    request: &AnalysisRequest,
) -> Result<(RunOutcome, usize), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OrchestratorEvent>();
    let printer = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(event) = rx.recv().await {
            info!(event = event.event_type(), "Event published");
            seen += 1;
        }
        seen
    });

    let outcome = orchestrator
        .run(request, Arc::new(ChannelSink::new(tx)), CancellationToken::new())
        .await;
    let seen = printer.await?;

    Ok((outcome?, seen))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Earnings Quality Orchestrator starting");

    let mut args = std::env::args().skip(1);
    let company_code = args.next().unwrap_or_else(|| SAMPLE_COMPANY.to_string());
    let query = args.next().unwrap_or_else(|| SAMPLE_QUERY.to_string());

    // Create components
    let orchestrator = sample_orchestrator().await;

    info!(company_code = %company_code, query = %query, "Running orchestrator");

    let request = AnalysisRequest::new(company_code, query);
    match run_logged(&orchestrator, &request).await {
        Ok((outcome, events)) => {
            info!(events, "Orchestration successful");
            println!("\n=== EXECUTION PLAN ===");
            for task in &outcome.plan.tasks {
                println!("  [{}] {} ({})", task.status, task.title, task.id);
            }

            println!("\n=== AGENT MESSAGES ===");
            for (i, message) in outcome.messages.iter().enumerate() {
                println!("  {}: [{}] {}", i + 1, message.from, message.content);
            }

            println!("\n=== RESULT ===");
            println!("{}", serde_json::to_string_pretty(&outcome.envelope)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Orchestration failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earnings_quality_orchestrator::models::EnvelopeStatus;

    #[tokio::test]
    async fn test_sample_run_logs_every_event() {
        let orchestrator = sample_orchestrator().await;
        let request = AnalysisRequest::new(SAMPLE_COMPANY, SAMPLE_QUERY);

        let (outcome, events) = run_logged(&orchestrator, &request).await.unwrap();

        assert_eq!(outcome.envelope.status, EnvelopeStatus::Success);
        assert!(outcome.envelope.rating.is_some());
        // Every message plus analysis, plan, task updates and the result.
        assert!(events > outcome.messages.len());
    }
}
