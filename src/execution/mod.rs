//! Task executor
//!
//! Walks a plan in list order, one task at a time and depth-first through
//! nested subtasks, driving each through
//! `pending → assigned → in-progress → completed | failed`.
//! A failing task is recorded and execution moves on; only cancellation
//! ends a run early. Declared dependencies are not used for ordering.

use crate::error::OrchestrationError;
use crate::events::RunJournal;
use crate::extraction::DataShaper;
use crate::metrics;
use crate::models::{
    AgentType, CalculatedMetrics, ExecutionPlan, ExecutionTime, ExtractedData, MessageType,
    QualityAssessment, Task, TaskStatus, TaskType,
};
use crate::quality;
use crate::Result;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Points in a task's lifecycle where a pacing policy may pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacePoint {
    Assigned,
    Started,
    Subtask,
    Work,
}

/// Optional delay between transitions, for observers that animate progress.
pub trait PacingPolicy: Send + Sync {
    fn delay(&self, point: PacePoint) -> Option<Duration>;
}

pub struct NoPacing;

impl PacingPolicy for NoPacing {
    fn delay(&self, _point: PacePoint) -> Option<Duration> {
        None
    }
}

pub struct FixedPacing(pub Duration);

impl PacingPolicy for FixedPacing {
    fn delay(&self, _point: PacePoint) -> Option<Duration> {
        Some(self.0)
    }
}

pub fn pacing_from_millis(ms: u64) -> Arc<dyn PacingPolicy> {
    if ms == 0 {
        Arc::new(NoPacing)
    } else {
        Arc::new(FixedPacing(Duration::from_millis(ms)))
    }
}

/// Stage outputs of one run. Each stage writes its own field and reads only
/// fields written by earlier stages.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
    pub extracted_data: Option<ExtractedData>,
    pub calculated_metrics: Option<CalculatedMetrics>,
    pub assessment: Option<QualityAssessment>,
    pub timings: ExecutionTime,
}

/// Index path from a top-level task down through nested subtasks.
fn task_at<'p>(plan: &'p mut ExecutionPlan, path: &[usize]) -> Result<&'p mut Task> {
    let missing = || OrchestrationError::ExecutionError(format!("No task at {:?}", path));
    let (first, rest) = path.split_first().ok_or_else(missing)?;
    let mut task = plan.tasks.get_mut(*first).ok_or_else(missing)?;
    for &i in rest {
        task = task
            .subtasks
            .as_mut()
            .and_then(|subtasks| subtasks.get_mut(i))
            .ok_or_else(missing)?;
    }
    Ok(task)
}

fn task_ref<'p>(plan: &'p ExecutionPlan, path: &[usize]) -> Option<&'p Task> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(plan.tasks.get(*first)?, |task, &i| task.subtasks().get(i))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub struct TaskExecutor {
    shaper: Arc<DataShaper>,
    pacing: Arc<dyn PacingPolicy>,
}

impl TaskExecutor {
    pub fn new(shaper: Arc<DataShaper>, pacing: Arc<dyn PacingPolicy>) -> Self {
        Self { shaper, pacing }
    }

    /// Execute every task of `plan` against `company_code`.
    pub async fn execute_plan(
        &self,
        plan: &mut ExecutionPlan,
        company_code: &str,
        journal: &mut RunJournal,
        cancel: &CancellationToken,
    ) -> Result<RunResults> {
        let mut results = RunResults::default();
        let started = Instant::now();

        debug!(plan_id = %plan.id, tasks = plan.tasks.len(), "Starting plan execution");

        for index in 0..plan.tasks.len() {
            if cancel.is_cancelled() {
                warn!(plan_id = %plan.id, "Run cancelled");
                return Err(OrchestrationError::Cancelled);
            }
            self.execute_task(plan, index, company_code, &mut results, journal, cancel)
                .await?;
        }

        results.timings.total = elapsed_ms(started);

        info!(
            plan_id = %plan.id,
            completed = plan.tasks.iter().filter(|t| t.status == TaskStatus::Completed).count(),
            failed = plan.tasks.iter().filter(|t| t.status == TaskStatus::Failed).count(),
            total_ms = results.timings.total,
            "Plan execution finished"
        );

        Ok(results)
    }

    async fn execute_task(
        &self,
        plan: &mut ExecutionPlan,
        index: usize,
        company_code: &str,
        results: &mut RunResults,
        journal: &mut RunJournal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = [index];
        let (task_type, title, subtask_count) = {
            let task = &plan.tasks[index];
            (task.task_type, task.title.clone(), task.subtasks().len())
        };
        let agent = AgentType::for_task(task_type);

        self.update(plan, &path, journal, |t| {
            t.transition(TaskStatus::Assigned)?;
            t.assigned_agent = Some(agent);
            Ok(())
        })?;
        self.pace(PacePoint::Assigned, cancel).await?;

        self.update(plan, &path, journal, |t| t.transition(TaskStatus::InProgress))?;
        journal.say(agent, MessageType::Status, format!("Starting task: {}", title));
        self.pace(PacePoint::Started, cancel).await?;

        let outcome = if subtask_count > 0 {
            self.run_subtasks(plan, &path, agent, company_code, results, journal, cancel)
                .await
                .map(|()| None)
        } else {
            self.perform(task_type, company_code, results, journal, cancel).await
        };

        match outcome {
            Ok(result) => {
                self.update(plan, &path, journal, |t| {
                    t.result = result;
                    t.transition(TaskStatus::Completed)
                })?;
                journal.say(agent, MessageType::Result, format!("Completed: {}", title));
            }
            Err(OrchestrationError::Cancelled) => return Err(OrchestrationError::Cancelled),
            Err(e) => {
                warn!(task_id = %plan.tasks[index].id, error = %e, "Task failed");
                let message = e.to_string();
                self.update(plan, &path, journal, |t| {
                    t.error = Some(message.clone());
                    t.transition(TaskStatus::Failed)
                })?;
                journal.say(agent, MessageType::Error, format!("Failed: {} - {}", title, message));
            }
        }

        Ok(())
    }

    /// Children of the task at `parent`, in order. The first failure stops
    /// the walk and leaves later siblings pending.
    #[allow(clippy::too_many_arguments)]
    fn run_subtasks<'a>(
        &'a self,
        plan: &'a mut ExecutionPlan,
        parent: &'a [usize],
        agent: AgentType,
        company_code: &'a str,
        results: &'a mut RunResults,
        journal: &'a mut RunJournal,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let count = task_at(plan, parent)?.subtasks().len();
            for j in 0..count {
                let mut path = parent.to_vec();
                path.push(j);
                self.execute_subtask(plan, &path, agent, company_code, results, journal, cancel)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_subtask(
        &self,
        plan: &mut ExecutionPlan,
        path: &[usize],
        agent: AgentType,
        company_code: &str,
        results: &mut RunResults,
        journal: &mut RunJournal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        let (task_type, title, nested) = {
            let task = task_at(plan, path)?;
            (task.task_type, task.title.clone(), !task.subtasks().is_empty())
        };

        self.update(plan, path, journal, |t| {
            t.transition(TaskStatus::Assigned)?;
            t.assigned_agent = Some(agent);
            Ok(())
        })?;
        self.update(plan, path, journal, |t| t.transition(TaskStatus::InProgress))?;
        journal.say(agent, MessageType::Status, format!("Processing: {}", title));
        self.pace(PacePoint::Subtask, cancel).await?;

        let outcome = if nested {
            self.run_subtasks(plan, path, agent, company_code, results, journal, cancel)
                .await
                .map(|()| None)
        } else {
            self.perform(task_type, company_code, results, journal, cancel).await
        };

        match outcome {
            Ok(result) => self.update(plan, path, journal, |t| {
                t.result = result;
                t.transition(TaskStatus::Completed)
            }),
            Err(OrchestrationError::Cancelled) => Err(OrchestrationError::Cancelled),
            Err(e) => {
                let message = e.to_string();
                self.update(plan, path, journal, |t| {
                    t.error = Some(message);
                    t.transition(TaskStatus::Failed)
                })?;
                Err(e)
            }
        }
    }

    /// Apply `change` to the task at `path`, then publish it with a plan snapshot.
    fn update<F>(
        &self,
        plan: &mut ExecutionPlan,
        path: &[usize],
        journal: &RunJournal,
        change: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        change(task_at(plan, path)?)?;
        let plan: &ExecutionPlan = plan;
        if let Some(task) = task_ref(plan, path) {
            journal.task_updated(task, plan);
        }
        Ok(())
    }

    async fn pace(&self, point: PacePoint, cancel: &CancellationToken) -> Result<()> {
        let Some(delay) = self.pacing.delay(point) else {
            return Ok(());
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestrationError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Work function for a task type. Returns a summary stored on the task.
    async fn perform(
        &self,
        task_type: TaskType,
        company_code: &str,
        results: &mut RunResults,
        journal: &mut RunJournal,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        match task_type {
            TaskType::Extraction => {
                journal.say(
                    AgentType::DataExtraction,
                    MessageType::Thinking,
                    "Querying financial database...",
                );
                self.pace(PacePoint::Work, cancel).await?;

                let start = Instant::now();
                let data = tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                    extracted = self.shaper.extract(company_code) => extracted?,
                };
                results.timings.extraction += elapsed_ms(start);

                journal.say(
                    AgentType::DataExtraction,
                    MessageType::Result,
                    format!("Found {} relevant tables", data.raw_tables.len()),
                );

                let summary = json!({
                    "tables": data.raw_tables.len(),
                    "cashFlow": data.cash_flow.is_some(),
                    "incomeStatement": data.income_statement.is_some(),
                    "balanceSheet": data.balance_sheet.is_some(),
                });
                results.extracted_data = Some(data);
                Ok(Some(summary))
            }
            TaskType::Calculation => {
                let data = results.extracted_data.as_ref().ok_or_else(|| {
                    OrchestrationError::DependencyNotReady(
                        "No data available for calculation".into(),
                    )
                })?;

                journal.say(
                    AgentType::Calculation,
                    MessageType::Thinking,
                    "Computing financial metrics...",
                );
                self.pace(PacePoint::Work, cancel).await?;

                let start = Instant::now();
                let calculated = metrics::calculate(data);
                results.timings.calculation += elapsed_ms(start);

                journal.say(
                    AgentType::Calculation,
                    MessageType::Result,
                    format!(
                        "Calculated: Accruals ratio {:.2}%, M-Score {:.2}",
                        calculated.accruals_ratio * 100.0,
                        calculated.m_score
                    ),
                );

                let summary = serde_json::to_value(&calculated)?;
                results.calculated_metrics = Some(calculated);
                Ok(Some(summary))
            }
            TaskType::Assessment => {
                let calculated = results.calculated_metrics.as_ref().ok_or_else(|| {
                    OrchestrationError::DependencyNotReady(
                        "No metrics available for assessment".into(),
                    )
                })?;

                journal.say(
                    AgentType::Assessment,
                    MessageType::Thinking,
                    "Evaluating earnings quality...",
                );
                self.pace(PacePoint::Work, cancel).await?;

                let start = Instant::now();
                let assessment = quality::assess(calculated);
                results.timings.assessment += elapsed_ms(start);

                journal.say(
                    AgentType::Assessment,
                    MessageType::Result,
                    format!(
                        "Assessment complete: {} ({}/100)",
                        assessment.rating.grade, assessment.rating.score
                    ),
                );

                let summary = serde_json::to_value(&assessment.rating)?;
                results.assessment = Some(assessment);
                Ok(Some(summary))
            }
            TaskType::Report | TaskType::Analysis => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::events::OrchestratorEvent;
    use crate::extraction::{InMemoryTableStore, TableStore};
    use crate::models::{Entities, Grade, QueryAnalysis, RawTable, StatementCategory};
    use crate::planner::PlanCompiler;

    const CODE: &str = "00126380";

    struct FailingStore;

    #[async_trait::async_trait]
    impl TableStore for FailingStore {
        async fn fetch_tables(
            &self,
            _company_code: &str,
            _category: StatementCategory,
            _limit: usize,
        ) -> Result<Vec<RawTable>> {
            Err(OrchestrationError::TableStoreError("connection refused".into()))
        }
    }

    fn analysis(requirements: &[&str]) -> QueryAnalysis {
        QueryAnalysis::new(
            "earnings_quality_analysis",
            requirements.iter().map(|r| r.to_string()).collect(),
            Entities::default(),
            0.92,
        )
    }

    fn full_requirements() -> QueryAnalysis {
        analysis(&[
            "Comprehensive earnings quality assessment",
            "Accruals analysis and red flag detection",
            "Cash flow to net income comparison",
            "Overall quality rating generation",
        ])
    }

    async fn seeded_executor() -> TaskExecutor {
        let store = InMemoryTableStore::new();
        store.seed_samples(CODE).await;
        TaskExecutor::new(Arc::new(DataShaper::new(Arc::new(store), 10)), Arc::new(NoPacing))
    }

    fn failing_executor() -> TaskExecutor {
        TaskExecutor::new(
            Arc::new(DataShaper::new(Arc::new(FailingStore), 10)),
            Arc::new(NoPacing),
        )
    }

    #[tokio::test]
    async fn test_full_run_completes_every_task() {
        let executor = seeded_executor().await;
        let sink = Arc::new(RecordingSink::default());
        let mut journal = RunJournal::new(sink.clone());
        let mut plan = PlanCompiler::compile("q", full_requirements());

        let results = executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert!(plan.tasks.iter().all(|t| t.start_time.is_some() && t.end_time.is_some()));
        assert_eq!(
            plan.find_task("calculate-accruals").unwrap().assigned_agent,
            Some(AgentType::Calculation)
        );
        assert_eq!(
            plan.find_task("generate-report").unwrap().assigned_agent,
            Some(AgentType::Master)
        );

        let assessment = results.assessment.unwrap();
        assert_eq!(assessment.rating.grade, Grade::Excellent);
        assert!(results.calculated_metrics.unwrap().has_all_data);

        // assigned: task_update + plan, then in-progress: task_update + plan + message
        assert_eq!(
            &sink.types()[..5],
            &["task_update", "plan", "task_update", "plan", "message"]
        );
    }

    #[tokio::test]
    async fn test_failed_extraction_does_not_abort_run() {
        let executor = failing_executor();
        let mut journal = RunJournal::new(Arc::new(RecordingSink::default()));
        let mut plan = PlanCompiler::compile("q", full_requirements());

        let results = executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        let status = |id: &str| plan.find_task(id).unwrap().status;
        assert_eq!(status("extract-data"), TaskStatus::Failed);
        assert_eq!(status("calculate-accruals"), TaskStatus::Failed);
        assert_eq!(status("calculate-cf-ratio"), TaskStatus::Failed);
        assert_eq!(status("generate-rating"), TaskStatus::Failed);
        assert_eq!(status("validate-results"), TaskStatus::Failed);
        assert_eq!(status("generate-report"), TaskStatus::Completed);

        let calc = plan.find_task("calculate-accruals").unwrap();
        assert_eq!(calc.error.as_deref(), Some("No data available for calculation"));
        assert!(results.extracted_data.is_none());
        assert!(results.assessment.is_none());

        assert!(journal
            .messages()
            .iter()
            .any(|m| {
                m.message_type == MessageType::Error
                    && m.content.starts_with("Failed: Extract financial data")
            }));
    }

    #[tokio::test]
    async fn test_subtask_failure_fails_parent_and_leaves_siblings_pending() {
        let executor = failing_executor();
        let mut journal = RunJournal::new(Arc::new(RecordingSink::default()));
        let mut plan = PlanCompiler::standard_template("q", analysis(&[]));

        executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        let status = |id: &str| plan.find_task(id).unwrap().status;
        assert_eq!(status("extract-cf"), TaskStatus::Failed);
        assert_eq!(status("extract-is"), TaskStatus::Pending);
        assert_eq!(status("extract-bs"), TaskStatus::Pending);
        assert_eq!(status("extract-data"), TaskStatus::Failed);
        assert_eq!(status("calc-accruals"), TaskStatus::Failed);
        assert_eq!(status("calculate-metrics"), TaskStatus::Failed);
        assert_eq!(status("assess-quality"), TaskStatus::Failed);
        assert_eq!(status("generate-report"), TaskStatus::Completed);
    }

    fn nested_template() -> ExecutionPlan {
        let mut plan = PlanCompiler::standard_template("q", analysis(&[]));
        let leaves = plan.tasks[0].subtasks.take().unwrap();
        plan.tasks[0].subtasks = Some(vec![Task::new(
            "extract-statements",
            "Extract statements",
            "Grouped statement extraction",
            TaskType::Extraction,
            vec![],
        )
        .with_subtasks(leaves)]);
        plan
    }

    #[tokio::test]
    async fn test_nested_subtasks_are_walked() {
        let executor = seeded_executor().await;
        let mut journal = RunJournal::new(Arc::new(RecordingSink::default()));
        let mut plan = nested_template();

        let results = executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        for id in ["extract-data", "extract-statements", "extract-cf", "extract-is", "extract-bs"] {
            let task = plan.find_task(id).unwrap();
            assert_eq!(task.status, TaskStatus::Completed, "{}", id);
            assert_eq!(task.assigned_agent, Some(AgentType::DataExtraction), "{}", id);
        }
        assert!(results.extracted_data.is_some());
        assert!(results.assessment.is_some());
    }

    #[tokio::test]
    async fn test_nested_subtask_failure_climbs_to_top_level() {
        let executor = failing_executor();
        let mut journal = RunJournal::new(Arc::new(RecordingSink::default()));
        let mut plan = nested_template();

        executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        let status = |id: &str| plan.find_task(id).unwrap().status;
        assert_eq!(status("extract-cf"), TaskStatus::Failed);
        assert_eq!(status("extract-is"), TaskStatus::Pending);
        assert_eq!(status("extract-statements"), TaskStatus::Failed);
        assert_eq!(status("extract-data"), TaskStatus::Failed);
        assert_eq!(status("generate-report"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_template_run_records_phase_timings() {
        let executor = seeded_executor().await;
        let mut journal = RunJournal::new(Arc::new(RecordingSink::default()));
        let mut plan = PlanCompiler::standard_template("q", analysis(&[]));

        let results = executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        assert!(plan.find_task("calc-mscore").unwrap().result.is_some());
        assert!(results.assessment.is_some());
        assert!(results.timings.total >= results.timings.extraction);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_next_task() {
        let executor = seeded_executor().await;
        let sink = Arc::new(RecordingSink::default());
        let mut journal = RunJournal::new(sink.clone());
        let mut plan = PlanCompiler::compile("q", full_requirements());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor
            .execute_plan(&mut plan, CODE, &mut journal, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::Cancelled));
        assert!(sink.events().is_empty());
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pacing() {
        let store = InMemoryTableStore::new();
        let executor = TaskExecutor::new(
            Arc::new(DataShaper::new(Arc::new(store), 10)),
            Arc::new(FixedPacing(Duration::from_secs(60))),
        );
        let mut journal = RunJournal::new(Arc::new(RecordingSink::default()));
        let mut plan = PlanCompiler::compile("q", full_requirements());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = executor
            .execute_plan(&mut plan, CODE, &mut journal, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled));
        assert_eq!(plan.tasks[0].status, TaskStatus::Assigned);
    }

    #[test]
    fn test_pacing_from_millis() {
        assert_eq!(pacing_from_millis(0).delay(PacePoint::Work), None);
        assert_eq!(
            pacing_from_millis(250).delay(PacePoint::Assigned),
            Some(Duration::from_millis(250))
        );
    }

    #[tokio::test]
    async fn test_plan_snapshots_follow_each_task_update() {
        let executor = seeded_executor().await;
        let sink = Arc::new(RecordingSink::default());
        let mut journal = RunJournal::new(sink.clone());
        let mut plan = PlanCompiler::compile("q", analysis(&["Beneish M-Score calculation"]));

        executor
            .execute_plan(&mut plan, CODE, &mut journal, &CancellationToken::new())
            .await
            .unwrap();

        let events = sink.events();
        for (i, event) in events.iter().enumerate() {
            if let OrchestratorEvent::TaskUpdate(task) = event {
                match &events[i + 1] {
                    OrchestratorEvent::Plan(snapshot) => {
                        assert_eq!(snapshot.find_task(&task.id).unwrap().status, task.status)
                    }
                    other => panic!("expected plan snapshot, got {}", other.event_type()),
                }
            }
        }
    }
}
