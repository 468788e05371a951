//! Orchestrator
//!
//! ANALYZE → PLAN → EXECUTE → REPORT
//!
//! One `run` per request: the query is analyzed, compiled into a plan, the
//! plan is executed task by task, and a result envelope is produced. Every
//! step is published through the run's event sink.

use crate::error::OrchestrationError;
use crate::events::{EventSink, OrchestratorEvent, RunJournal};
use crate::execution::{PacingPolicy, RunResults, TaskExecutor};
use crate::extraction::{DataShaper, TableStore};
use crate::metrics;
use crate::models::{
    AgentMessage, AgentType, EnvelopeStatus, ExecutionPlan, ExecutionTime, MessageType,
    MetricsSummary, QueryAnalysis, ResultEnvelope,
};
use crate::planner::{PlanCompiler, QueryAnalyzer};
use crate::quality;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub company_code: String,
    pub query: String,
    pub confirmed_requirements: Option<Vec<String>>,
    pub use_template: bool,
}

impl AnalysisRequest {
    pub fn new(company_code: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            company_code: company_code.into(),
            query: query.into(),
            confirmed_requirements: None,
            use_template: false,
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub analysis: QueryAnalysis,
    pub plan: ExecutionPlan,
    pub results: RunResults,
    pub messages: Vec<AgentMessage>,
    pub envelope: ResultEnvelope,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Success envelope from whatever stages produced output.
pub fn build_envelope(results: &RunResults, execution_time: ExecutionTime) -> ResultEnvelope {
    ResultEnvelope {
        status: EnvelopeStatus::Success,
        rating: results.assessment.as_ref().map(|a| a.rating.clone()),
        metrics: results.calculated_metrics.as_ref().map(MetricsSummary::from),
        alerts: results.assessment.as_ref().map(|a| a.alerts.clone()),
        execution_time: Some(execution_time),
        sources: Some(
            results
                .extracted_data
                .as_ref()
                .map(|d| d.sources())
                .unwrap_or_default(),
        ),
        error: None,
    }
}

/// Main orchestrator that coordinates analysis, planning and execution
pub struct Orchestrator {
    analyzer: Arc<dyn QueryAnalyzer>,
    shaper: Arc<DataShaper>,
    executor: TaskExecutor,
}

impl Orchestrator {
    pub fn new(
        analyzer: Arc<dyn QueryAnalyzer>,
        shaper: Arc<DataShaper>,
        pacing: Arc<dyn PacingPolicy>,
    ) -> Self {
        let executor = TaskExecutor::new(shaper.clone(), pacing);
        Self {
            analyzer,
            shaper,
            executor,
        }
    }

    pub fn table_store(&self) -> &Arc<dyn TableStore> {
        self.shaper.store()
    }

    /// Requirements for the confirmation step, before any plan exists.
    pub async fn analyze(&self, query: &str) -> Result<QueryAnalysis> {
        self.analyzer.analyze(query, None).await
    }

    /// Run the full pipeline, publishing every step to `sink`.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut journal = RunJournal::new(sink);

        info!(
            company_code = %request.company_code,
            query = %request.query,
            confirmed = request.confirmed_requirements.is_some(),
            use_template = request.use_template,
            "Orchestrator: starting run"
        );

        // === ANALYZE ===
        journal.say(
            AgentType::Master,
            MessageType::Thinking,
            "Analyzing user query to understand requirements...",
        );

        let analysis = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            analysis = self
                .analyzer
                .analyze(&request.query, request.confirmed_requirements.as_deref()) => analysis?,
        };

        journal.say_with(
            AgentType::Master,
            MessageType::Decision,
            format!(
                "Query analysis complete. Identified {} key requirements. Complexity: {}",
                analysis.requirements.len(),
                analysis.complexity
            ),
            serde_json::to_value(&analysis)?,
        );
        journal.emit(OrchestratorEvent::Analysis(analysis.clone()));

        // === PLAN ===
        journal.say(
            AgentType::Master,
            MessageType::Thinking,
            "Creating execution plan based on requirements...",
        );

        let mut plan = if request.use_template {
            PlanCompiler::standard_template(&request.query, analysis.clone())
        } else {
            PlanCompiler::compile(&request.query, analysis.clone())
        };

        journal.say_with(
            AgentType::Master,
            MessageType::Decision,
            format!(
                "Execution plan created: {} tasks, {} specialized agents required",
                plan.tasks.len(),
                plan.agents.len()
            ),
            serde_json::to_value(&plan)?,
        );

        for agent in &plan.agents {
            let capability = agent
                .capabilities()
                .first()
                .map(|c| c.to_lowercase())
                .unwrap_or_default();
            journal.say(
                AgentType::Master,
                MessageType::Decision,
                format!("Assigning {} to handle {}", agent.display_name(), capability),
            );
        }
        journal.emit(OrchestratorEvent::Plan(plan.clone()));

        // === EXECUTE ===
        let results = self
            .executor
            .execute_plan(&mut plan, &request.company_code, &mut journal, &cancel)
            .await?;

        // === REPORT ===
        let execution_time = ExecutionTime {
            total: elapsed_ms(started),
            ..results.timings
        };
        let envelope = build_envelope(&results, execution_time);
        journal.emit(OrchestratorEvent::Result(envelope.clone()));

        info!(
            plan_id = %plan.id,
            grade = ?envelope.rating.as_ref().map(|r| r.grade),
            total_ms = execution_time.total,
            "Orchestrator: run complete"
        );

        Ok(RunOutcome {
            analysis,
            plan,
            results,
            messages: journal.into_messages(),
            envelope,
        })
    }

    /// Extraction, calculation and assessment without planning. Failures are
    /// reported in the envelope together with the timings reached so far.
    pub async fn assess(&self, company_code: &str) -> ResultEnvelope {
        let started = Instant::now();
        let mut execution_time = ExecutionTime::default();

        info!(company_code, "Starting earnings quality analysis");

        let extraction_start = Instant::now();
        let extracted = match self.shaper.extract(company_code).await {
            Ok(data) => data,
            Err(e) => {
                error!(company_code, error = %e, "Earnings quality analysis failed");
                execution_time.extraction = elapsed_ms(extraction_start);
                execution_time.total = elapsed_ms(started);
                return ResultEnvelope::error(e.to_string(), Some(execution_time));
            }
        };
        execution_time.extraction = elapsed_ms(extraction_start);

        let calculation_start = Instant::now();
        let calculated = metrics::calculate(&extracted);
        execution_time.calculation = elapsed_ms(calculation_start);

        let assessment_start = Instant::now();
        let assessment = quality::assess(&calculated);
        execution_time.assessment = elapsed_ms(assessment_start);

        execution_time.total = elapsed_ms(started);
        info!(total_ms = execution_time.total, "Earnings quality analysis complete");

        let results = RunResults {
            extracted_data: Some(extracted),
            calculated_metrics: Some(calculated),
            assessment: Some(assessment),
            timings: execution_time,
        };
        build_envelope(&results, execution_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::events::NullSink;
    use crate::execution::NoPacing;
    use crate::extraction::InMemoryTableStore;
    use crate::models::{Grade, TaskStatus};
    use crate::planner::KeywordAnalyzer;

    const CODE: &str = "00126380";

    async fn orchestrator() -> Orchestrator {
        let store = InMemoryTableStore::new();
        store.seed_samples(CODE).await;
        Orchestrator::new(
            Arc::new(KeywordAnalyzer),
            Arc::new(DataShaper::new(Arc::new(store), 10)),
            Arc::new(NoPacing),
        )
    }

    #[tokio::test]
    async fn test_run_publishes_analysis_plan_and_result() {
        let orchestrator = orchestrator().await;
        let sink = Arc::new(RecordingSink::default());
        let request = AnalysisRequest::new(
            CODE,
            "Assess Samsung's earnings quality, accruals red flags and give a rating",
        );

        let outcome = orchestrator
            .run(&request, sink.clone(), CancellationToken::new())
            .await
            .unwrap();

        let types = sink.types();
        let first = |t: &str| types.iter().position(|x| *x == t).unwrap();
        assert!(first("analysis") < first("plan"));
        assert!(first("plan") < first("task_update"));
        assert_eq!(types.last(), Some(&"result"));

        assert_eq!(outcome.envelope.status, EnvelopeStatus::Success);
        assert_eq!(outcome.envelope.rating.as_ref().map(|r| r.grade), Some(Grade::Excellent));
        assert_eq!(outcome.envelope.sources.as_ref().map(Vec::len), Some(3));
        assert!(outcome.plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));

        assert!(outcome
            .messages
            .iter()
            .any(|m| {
                m.content == "Assigning Data Extraction Agent to handle extract financial statements"
            }));
    }

    #[tokio::test]
    async fn test_confirmed_requirements_drive_the_plan() {
        let orchestrator = orchestrator().await;
        let mut request = AnalysisRequest::new(CODE, "earnings quality, accruals, rating, m-score");
        request.confirmed_requirements = Some(vec!["Beneish M-Score calculation".to_string()]);

        let outcome = orchestrator
            .run(&request, Arc::new(NullSink), CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.plan.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["calculate-mscore", "validate-results", "generate-report"]);
        assert!(outcome.envelope.rating.is_none());
        assert!(outcome.envelope.metrics.is_none());
    }

    #[tokio::test]
    async fn test_template_request_uses_standard_plan() {
        let orchestrator = orchestrator().await;
        let mut request = AnalysisRequest::new(CODE, "anything");
        request.use_template = true;

        let outcome = orchestrator
            .run(&request, Arc::new(NullSink), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.plan.tasks.len(), 4);
        assert!(outcome.envelope.rating.is_some());
    }

    #[tokio::test]
    async fn test_empty_plan_still_reports() {
        let orchestrator = orchestrator().await;
        let sink = Arc::new(RecordingSink::default());
        let request = AnalysisRequest::new(CODE, "hello");

        let outcome = orchestrator
            .run(&request, sink.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.plan.tasks.is_empty());
        assert!(!sink.types().contains(&"task_update"));
        assert_eq!(outcome.envelope.sources, Some(vec![]));
    }

    #[tokio::test]
    async fn test_cancelled_before_analysis() {
        let orchestrator = orchestrator().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run(&AnalysisRequest::new(CODE, "earnings quality"), Arc::new(NullSink), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled));
    }

    #[tokio::test]
    async fn test_synchronous_assessment_envelope() {
        let orchestrator = orchestrator().await;

        let envelope = orchestrator.assess(CODE).await;
        assert_eq!(envelope.status, EnvelopeStatus::Success);
        let metrics = envelope.metrics.unwrap();
        assert_eq!(metrics.accruals, 1_879_113.0);
        assert_eq!(metrics.operating_cf, 34_640_421.0);
        assert_eq!(envelope.alerts.map(|a| a.len()), Some(3));

        let json = serde_json::to_value(orchestrator.assess(CODE).await).unwrap();
        assert!(json.get("execution_time").is_some());
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_unknown_company_falls_back_with_warning() {
        let orchestrator = orchestrator().await;

        let envelope = orchestrator.assess("00000000").await;
        assert_eq!(envelope.status, EnvelopeStatus::Success);
        assert_eq!(envelope.rating.map(|r| r.confidence), Some(0.70));
        assert_eq!(envelope.sources, Some(vec![]));
        let alerts = envelope.alerts.unwrap();
        assert_eq!(alerts[0].metric.as_deref(), Some("Data Completeness"));
    }
}
