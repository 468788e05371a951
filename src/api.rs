//! REST API Server for the earnings quality orchestrator
//!
//! Exposes company lookup, requirement extraction, the synchronous analysis
//! envelope and the streamed orchestrated run.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::agent::{AnalysisRequest, Orchestrator};
use crate::companies;
use crate::error::OrchestrationError;
use crate::events::{ChannelSink, OrchestratorEvent};
use crate::models::{EnvelopeStatus, ResultEnvelope};
use crate::stream::{StreamEncoder, DONE_FRAME};

/// Frames buffered between the run and a slow client.
const FRAME_BUFFER: usize = 64;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct RequirementsRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsQualityRequest {
    #[serde(default)]
    pub corp_code: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratedRequest {
    #[serde(default)]
    pub corp_code: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub confirmed_requirements: Option<Vec<String>>,
    #[serde(default)]
    pub use_template: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompaniesQuery {
    pub code: Option<String>,
    pub name: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            count: None,
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            count: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub encoder: StreamEncoder,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = state.orchestrator.table_store().health_check().await;
    if !database {
        warn!("Table store health check failed");
    }

    let status = if database { "healthy" } else { "degraded" };
    let code = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "checks": {
                "api": true,
                "database": database,
            }
        })),
    )
}

/// =============================
/// Company Catalog
/// =============================

async fn list_companies(Query(query): Query<CompaniesQuery>) -> (StatusCode, Json<ApiResponse>) {
    let found = match (query.code.as_deref(), query.name.as_deref()) {
        (Some(code), _) => Some(companies::by_code(code)),
        (None, Some(name)) => Some(companies::by_name(name)),
        (None, None) => None,
    };

    match found {
        Some(Some(company)) => (StatusCode::OK, Json(ApiResponse::success(company))),
        Some(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Company not found")),
        ),
        None => {
            let all = companies::all();
            (
                StatusCode::OK,
                Json(ApiResponse::success(all).with_count(all.len())),
            )
        }
    }
}

/// =============================
/// Requirement Extraction
/// =============================

async fn extract_requirements(
    State(state): State<ApiState>,
    Json(req): Json<RequirementsRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Query is required")),
        );
    }

    match state.orchestrator.analyze(&req.query).await {
        Ok(analysis) => (StatusCode::OK, Json(ApiResponse::success(analysis))),
        Err(e) => {
            error!(error = %e, "Requirement extraction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Requirement extraction failed: {}", e))),
            )
        }
    }
}

/// =============================
/// Synchronous Analysis
/// =============================

async fn earnings_quality(
    State(state): State<ApiState>,
    Json(req): Json<EarningsQualityRequest>,
) -> (StatusCode, Json<ResultEnvelope>) {
    if req.corp_code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ResultEnvelope::error("Corp code is required", None)),
        );
    }

    info!(
        corp_code = %req.corp_code,
        language = ?req.language,
        "Received earnings quality request"
    );

    let envelope = state.orchestrator.assess(req.corp_code.trim()).await;
    let code = match envelope.status {
        EnvelopeStatus::Success => StatusCode::OK,
        EnvelopeStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(envelope))
}

/// =============================
/// Streamed Orchestration
/// =============================

async fn orchestrated(
    State(state): State<ApiState>,
    Json(req): Json<OrchestratedRequest>,
) -> Response {
    if req.corp_code.trim().is_empty() || req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ResultEnvelope::error("Corp code and query are required", None)),
        )
            .into_response();
    }

    info!(
        corp_code = %req.corp_code,
        language = ?req.language,
        use_template = req.use_template,
        "Received orchestrated request"
    );

    let request = AnalysisRequest {
        company_code: req.corp_code.trim().to_string(),
        query: req.query,
        confirmed_requirements: req.confirmed_requirements,
        use_template: req.use_template,
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = mpsc::channel::<String>(FRAME_BUFFER);
    let cancel = CancellationToken::new();

    let orchestrator = state.orchestrator.clone();
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        let sink = Arc::new(ChannelSink::new(event_tx.clone()));
        match orchestrator.run(&request, sink, run_cancel).await {
            Ok(_) => true,
            Err(OrchestrationError::Cancelled) => {
                info!("Orchestrated run cancelled by client disconnect");
                false
            }
            Err(e) => {
                error!(error = %e, "Orchestrated run failed");
                let _ = event_tx.send(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                false
            }
        }
    });

    tokio::spawn(forward_frames(state.encoder, event_rx, frame_tx, cancel, run));

    let body = Body::from_stream(ReceiverStream::new(frame_rx).map(Ok::<String, Infallible>));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

/// Encode events into frames until the run ends, then close with `[DONE]`
/// if it succeeded. A vanished client cancels the run.
async fn forward_frames(
    encoder: StreamEncoder,
    mut events: mpsc::UnboundedReceiver<OrchestratorEvent>,
    frames: mpsc::Sender<String>,
    cancel: CancellationToken,
    run: tokio::task::JoinHandle<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = frames.closed() => {
                cancel.cancel();
                return;
            }
            event = events.recv() => event,
        };

        let Some(event) = event else { break };
        for frame in encoder.encode(&event) {
            if frames.send(frame).await.is_err() {
                cancel.cancel();
                return;
            }
        }
    }

    if matches!(run.await, Ok(true)) {
        let _ = frames.send(DONE_FRAME.to_string()).await;
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, encoder: StreamEncoder) -> Router {
    let state = ApiState {
        orchestrator,
        encoder,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/companies", get(list_companies))
        .route("/api/requirements", post(extract_requirements))
        .route("/api/earnings-quality", post(earnings_quality))
        .route("/api/earnings-quality/orchestrated", post(orchestrated))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    encoder: StreamEncoder,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, encoder);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::NoPacing;
    use crate::extraction::{DataShaper, InMemoryTableStore, TableStore};
    use crate::models::{QueryAnalysis, RawTable, StatementCategory};
    use crate::planner::{KeywordAnalyzer, QueryAnalyzer};
    use crate::stream::{frame_payload, ChunkReassembler};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CODE: &str = "00126380";

    struct DownStore;

    #[async_trait::async_trait]
    impl TableStore for DownStore {
        async fn fetch_tables(
            &self,
            _company_code: &str,
            _category: StatementCategory,
            _limit: usize,
        ) -> crate::Result<Vec<RawTable>> {
            Err(OrchestrationError::TableStoreError("unreachable".into()))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    struct BrokenAnalyzer;

    #[async_trait::async_trait]
    impl QueryAnalyzer for BrokenAnalyzer {
        async fn analyze(
            &self,
            _query: &str,
            _confirmed: Option<&[String]>,
        ) -> crate::Result<QueryAnalysis> {
            Err(OrchestrationError::AnalysisServiceError("service down".into()))
        }
    }

    async fn router() -> Router {
        let store = InMemoryTableStore::new();
        store.seed_samples(CODE).await;
        router_with(Arc::new(KeywordAnalyzer), Arc::new(store))
    }

    fn router_with(analyzer: Arc<dyn QueryAnalyzer>, store: Arc<dyn TableStore>) -> Router {
        let orchestrator = Orchestrator::new(
            analyzer,
            Arc::new(DataShaper::new(store, 10)),
            Arc::new(NoPacing),
        );
        create_router(Arc::new(orchestrator), StreamEncoder::default())
    }

    async fn send(
        router: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, String) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Reassembled event values in arrival order, plus whether `[DONE]` arrived.
    fn decode_stream(body: &str) -> (Vec<Value>, bool) {
        let mut reassembler = ChunkReassembler::new();
        let mut events = Vec::new();
        let mut done = false;

        for frame in body.split_inclusive("\n\n") {
            match frame_payload(frame) {
                None => done = true,
                Some(payload) => {
                    if let Some(json) = reassembler.feed(payload).unwrap() {
                        events.push(serde_json::from_str(&json).unwrap());
                    }
                }
            }
        }
        (events, done)
    }

    #[tokio::test]
    async fn test_health_reports_database() {
        let (status, body) = send(router().await, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"]["database"], true);

        let degraded = router_with(Arc::new(KeywordAnalyzer), Arc::new(DownStore));
        let (status, body) = send(degraded, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("\"degraded\""));
    }

    #[tokio::test]
    async fn test_companies_lookup() {
        let (status, body) = send(router().await, "GET", "/api/companies", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["count"], 10);

        let (status, body) =
            send(router().await, "GET", "/api/companies?code=00126380", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["data"]["nameKo"], "삼성전자");

        let (status, _) = send(router().await, "GET", "/api/companies?name=nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_requirements_endpoint() {
        let (status, body) = send(
            router().await,
            "POST",
            "/api/requirements",
            Some(json!({"query": "Any red flags in cash flow?"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            json["data"]["requirements"],
            json!([
                "Accruals analysis and red flag detection",
                "Cash flow to net income comparison"
            ])
        );

        let (status, _) = send(router().await, "POST", "/api/requirements", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_earnings_quality_envelope() {
        let (status, body) = send(
            router().await,
            "POST",
            "/api/earnings-quality",
            Some(json!({"corpCode": CODE, "query": "earnings quality", "language": "en"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["rating"]["grade"], "EXCELLENT");
        assert_eq!(json["metrics"]["operating_cf"], 34_640_421.0);
        assert_eq!(json["sources"][0]["table_name"], "Cash Flow Statement");

        let (status, body) = send(
            router().await,
            "POST",
            "/api/earnings-quality",
            Some(json!({"corpCode": "", "query": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Corp code is required"));
    }

    #[tokio::test]
    async fn test_earnings_quality_store_failure_is_500() {
        let router = router_with(Arc::new(KeywordAnalyzer), Arc::new(DownStore));
        let (status, body) = send(
            router,
            "POST",
            "/api/earnings-quality",
            Some(json!({"corpCode": CODE})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["execution_time"]["total"].is_u64());
    }

    #[tokio::test]
    async fn test_orchestrated_stream_ends_with_result_and_done() {
        let (status, body) = send(
            router().await,
            "POST",
            "/api/earnings-quality/orchestrated",
            Some(json!({
                "corpCode": CODE,
                "query": "Check earnings quality, accruals, cash flow vs net income, m-score and rating"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with(DONE_FRAME));

        let (events, done) = decode_stream(&body);
        assert!(done);
        assert_eq!(events[0]["type"], "message");
        assert!(events.iter().any(|e| e["type"] == "analysis"));
        assert!(events.iter().any(|e| e["type"] == "task_update"));

        let last = events.last().unwrap();
        assert_eq!(last["type"], "result");
        assert_eq!(last["data"]["status"], "success");
        assert_eq!(last["data"]["rating"]["score"], 90);

        // Plan snapshots outgrow a single frame.
        assert!(body.contains("\"type\":\"chunk\""));
    }

    #[tokio::test]
    async fn test_orchestrated_validation_and_failure() {
        let (status, _) = send(
            router().await,
            "POST",
            "/api/earnings-quality/orchestrated",
            Some(json!({"corpCode": CODE, "query": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let store = InMemoryTableStore::new();
        let broken = router_with(Arc::new(BrokenAnalyzer), Arc::new(store));
        let (status, body) = send(
            broken,
            "POST",
            "/api/earnings-quality/orchestrated",
            Some(json!({"corpCode": CODE, "query": "earnings quality"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let (events, done) = decode_stream(&body);
        assert!(!done);
        let last = events.last().unwrap();
        assert_eq!(last["type"], "error");
        assert!(last["data"]["message"].as_str().unwrap().contains("service down"));
    }
}
