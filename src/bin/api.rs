use earnings_quality_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    config::AppConfig,
    execution::pacing_from_millis,
    extraction::{DataShaper, InMemoryTableStore, PgTableStore, TableStore},
    planner::{CachedAnalyzer, HttpQueryAnalyzer, KeywordAnalyzer, QueryAnalyzer},
    stream::StreamEncoder,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SAMPLE_COMPANY: &str = "00126380";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    info!("🚀 Earnings Quality Orchestrator - API Server");
    info!("📍 Port: {}", config.port);

    // Table store
    let store: Arc<dyn TableStore> = match config.database_url.as_deref() {
        Some(url) => {
            info!("🗄️  Connecting to table store");
            Arc::new(PgTableStore::connect(url).await?)
        }
        None => {
            warn!("DATABASE_URL not set, serving bundled sample statements for {}", SAMPLE_COMPANY);
            let store = InMemoryTableStore::new();
            store.seed_samples(SAMPLE_COMPANY).await;
            Arc::new(store)
        }
    };

    // Query analyzer
    let analyzer: Arc<dyn QueryAnalyzer> = match config.analysis_service_url.as_deref() {
        Some(endpoint) => {
            info!(endpoint, "🧠 Using remote query analysis service");
            Arc::new(CachedAnalyzer::new(
                HttpQueryAnalyzer::new(endpoint)?,
                config.analysis_cache_capacity,
            ))
        }
        None => {
            info!("🧠 Using keyword query analyzer");
            Arc::new(KeywordAnalyzer)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        analyzer,
        Arc::new(DataShaper::new(store, config.table_fetch_limit)),
        pacing_from_millis(config.pacing_ms),
    ));
    let encoder = StreamEncoder::new(config.stream_chunk_threshold, config.stream_chunk_size);

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, encoder, config.port).await?;

    Ok(())
}
