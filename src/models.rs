//! Core data models for the earnings quality pipeline

use crate::error::OrchestrationError;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

//
// ================= Agents =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Master,
    DataExtraction,
    Calculation,
    Assessment,
    Validation,
    Synthesis,
    Report,
}

impl AgentType {
    /// Agent that executes a task of the given type.
    pub fn for_task(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Extraction => AgentType::DataExtraction,
            TaskType::Calculation => AgentType::Calculation,
            TaskType::Assessment => AgentType::Assessment,
            _ => AgentType::Master,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Master => "master",
            AgentType::DataExtraction => "data-extraction",
            AgentType::Calculation => "calculation",
            AgentType::Assessment => "assessment",
            AgentType::Validation => "validation",
            AgentType::Synthesis => "synthesis",
            AgentType::Report => "report",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::Master => "Master Agent",
            AgentType::DataExtraction => "Data Extraction Agent",
            AgentType::Calculation => "Calculation Agent",
            AgentType::Assessment => "Quality Assessment Agent",
            AgentType::Validation => "Validation Agent",
            AgentType::Synthesis => "Synthesis Agent",
            AgentType::Report => "Report Agent",
        }
    }

    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentType::Master => &["Analyze queries", "Build execution plans", "Coordinate agents"],
            AgentType::DataExtraction => &[
                "Extract financial statements",
                "Parse cash flow data",
                "Read income statements",
                "Analyze balance sheets",
                "Handle Korean/English data",
            ],
            AgentType::Calculation => &[
                "Calculate financial ratios",
                "Compute accruals",
                "Calculate M-Score",
                "Perform trend analysis",
                "Statistical analysis",
            ],
            AgentType::Assessment => &[
                "Evaluate earnings quality",
                "Apply thresholds",
                "Generate risk scores",
                "Create alerts",
                "Benchmark comparisons",
            ],
            AgentType::Validation => &[
                "Cross-check calculations",
                "Verify data integrity",
                "Validate assumptions",
                "Check for anomalies",
            ],
            AgentType::Synthesis => &[
                "Combine results",
                "Generate insights",
                "Create visualizations",
                "Prepare reports",
            ],
            AgentType::Report => &[
                "Generate comprehensive reports",
                "Format analysis results",
                "Create executive summaries",
                "Export to various formats",
            ],
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Tasks =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Analysis,
    Extraction,
    Calculation,
    Assessment,
    Report,
}

impl TaskType {
    /// Estimated cost of one task of this type, in plan time units.
    pub fn estimated_cost(&self) -> u64 {
        match self {
            TaskType::Analysis => 500,
            TaskType::Extraction => 1000,
            TaskType::Calculation => 300,
            TaskType::Assessment => 200,
            TaskType::Report => 400,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Analysis => "analysis",
            TaskType::Extraction => "extraction",
            TaskType::Calculation => "calculation",
            TaskType::Assessment => "assessment",
            TaskType::Report => "report",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `pending → assigned → in-progress → {completed | failed}`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Assigned)
                | (TaskStatus::Assigned, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<AgentType>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Task {
    pub fn new(
        id: &str,
        title: &str,
        description: &str,
        task_type: TaskType,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            task_type,
            status: TaskStatus::Pending,
            assigned_agent: None,
            dependencies,
            subtasks: None,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            confidence: None,
        }
    }

    pub fn with_subtasks(mut self, subtasks: Vec<Task>) -> Self {
        self.subtasks = Some(subtasks);
        self
    }

    /// Move the task to `next`, stamping start/end times.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestrationError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        match next {
            TaskStatus::InProgress => self.start_time = Some(now_millis()),
            TaskStatus::Completed | TaskStatus::Failed => self.end_time = Some(now_millis()),
            _ => {}
        }

        Ok(())
    }

    pub fn subtasks(&self) -> &[Task] {
        self.subtasks.as_deref().unwrap_or(&[])
    }
}

//
// ================= Agent Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Thinking,
    Decision,
    Status,
    Result,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AgentMessage {
    pub fn new(from: AgentType, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            from: from.display_name().to_string(),
            to: None,
            message_type,
            content: content.into(),
            timestamp: now_millis(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

//
// ================= Query Analysis =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn from_requirement_count(count: usize) -> Self {
        if count > 4 {
            Complexity::Complex
        } else if count > 2 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryAnalysis {
    pub intent: String,
    pub requirements: Vec<String>,
    pub entities: Entities,
    pub complexity: Complexity,
    pub confidence: f64,
}

impl QueryAnalysis {
    /// Complexity is derived from the requirement count, never supplied.
    pub fn new(
        intent: impl Into<String>,
        requirements: Vec<String>,
        entities: Entities,
        confidence: f64,
    ) -> Self {
        let complexity = Complexity::from_requirement_count(requirements.len());
        Self {
            intent: intent.into(),
            requirements,
            entities,
            complexity,
            confidence,
        }
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub query: String,
    pub analysis: QueryAnalysis,
    pub tasks: Vec<Task>,
    pub agents: Vec<AgentType>,
    pub estimated_time: u64,
    pub created_at: i64,
}

impl ExecutionPlan {
    /// Locate a task or subtask by id.
    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        fn walk<'a>(tasks: &'a [Task], task_id: &str) -> Option<&'a Task> {
            for task in tasks {
                if task.id == task_id {
                    return Some(task);
                }
                if let Some(found) = walk(task.subtasks(), task_id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.tasks, task_id)
    }
}

//
// ================= Statement Tables =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatementCategory {
    CashFlow,
    IncomeStatement,
    BalanceSheet,
}

impl StatementCategory {
    pub const ALL: [StatementCategory; 3] = [
        StatementCategory::CashFlow,
        StatementCategory::IncomeStatement,
        StatementCategory::BalanceSheet,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            StatementCategory::CashFlow => "Cash Flow Statement",
            StatementCategory::IncomeStatement => "Income Statement",
            StatementCategory::BalanceSheet => "Balance Sheet",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableMetadata {
    pub statement_type: Option<String>,
    pub table_title: Option<String>,
    pub table_title_en: Option<String>,
    pub table_title_ko: Option<String>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

/// One statement table as returned by the table store. `data` is a 2-D array
/// of cells whose first column holds the line-item label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawTable {
    pub id: String,
    pub source_file: String,
    pub page_number: i32,
    #[serde(default)]
    pub metadata: TableMetadata,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub period: String,
    pub source: String,
    pub page_number: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowRecord {
    pub net_income: Option<f64>,
    pub operating_cash_flow: Option<f64>,
    #[serde(flatten)]
    pub source: SourceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStatementRecord {
    pub revenue: Option<f64>,
    pub operating_profit: Option<f64>,
    pub net_income: Option<f64>,
    #[serde(flatten)]
    pub source: SourceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheetRecord {
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub total_equity: Option<f64>,
    #[serde(flatten)]
    pub source: SourceInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    pub cash_flow: Option<CashFlowRecord>,
    pub income_statement: Option<IncomeStatementRecord>,
    pub balance_sheet: Option<BalanceSheetRecord>,
    pub raw_tables: Vec<RawTable>,
}

impl ExtractedData {
    /// Citations for every statement category that yielded a record.
    pub fn sources(&self) -> Vec<SourceRef> {
        let entries = [
            (StatementCategory::CashFlow, self.cash_flow.as_ref().map(|r| &r.source)),
            (
                StatementCategory::IncomeStatement,
                self.income_statement.as_ref().map(|r| &r.source),
            ),
            (StatementCategory::BalanceSheet, self.balance_sheet.as_ref().map(|r| &r.source)),
        ];

        entries
            .into_iter()
            .filter_map(|(category, source)| {
                source.map(|s| SourceRef {
                    table_name: category.table_name().to_string(),
                    source_file: s.source.clone(),
                    page_number: s.page_number,
                    period: s.period.clone(),
                })
            })
            .collect()
    }
}

//
// ================= Metrics =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MetricField {
    NetIncome,
    OperatingCashFlow,
    TotalAssets,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MScoreComponents {
    pub dsri: f64,
    pub gmi: f64,
    pub sgi: f64,
    pub tata: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedMetrics {
    pub net_income: f64,
    pub operating_cash_flow: f64,
    pub total_assets: f64,
    pub accruals: f64,
    pub accruals_ratio: f64,
    pub cf_ni_ratio: f64,
    pub m_score: f64,
    pub m_score_components: MScoreComponents,
    pub revenue: Option<f64>,
    pub operating_profit: Option<f64>,
    pub has_all_data: bool,
    /// Fields whose value is a documented default rather than extracted data.
    #[serde(default)]
    pub fallbacks: Vec<MetricField>,
}

//
// ================= Assessment =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        if score >= 85 {
            Grade::Excellent
        } else if score >= 70 {
            Grade::Good
        } else if score >= 50 {
            Grade::Moderate
        } else {
            Grade::Poor
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::Excellent => "EXCELLENT",
            Grade::Good => "GOOD",
            Grade::Moderate => "MODERATE",
            Grade::Poor => "POOR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub score: u32,
    pub grade: Grade,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub accrual_quality: String,
    pub cash_flow_quality: String,
    pub manipulation_risk: String,
    pub overall_assessment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityAssessment {
    pub rating: Rating,
    pub alerts: Vec<Alert>,
    pub insights: Insights,
}

//
// ================= Result Envelope =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    pub accruals: f64,
    pub accruals_ratio: f64,
    pub cf_ni_ratio: f64,
    pub m_score: f64,
    pub total_assets: f64,
    pub net_income: f64,
    pub operating_cf: f64,
}

impl From<&CalculatedMetrics> for MetricsSummary {
    fn from(m: &CalculatedMetrics) -> Self {
        Self {
            accruals: m.accruals,
            accruals_ratio: m.accruals_ratio,
            cf_ni_ratio: m.cf_ni_ratio,
            m_score: m.m_score,
            total_assets: m.total_assets,
            net_income: m.net_income,
            operating_cf: m.operating_cash_flow,
        }
    }
}

/// Per-phase wall-clock timings in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionTime {
    pub extraction: u64,
    pub calculation: u64,
    pub assessment: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub table_name: String,
    pub source_file: String,
    pub page_number: i32,
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEnvelope {
    pub status: EnvelopeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts: Option<Vec<Alert>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<ExecutionTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    pub fn error(message: impl Into<String>, execution_time: Option<ExecutionTime>) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            rating: None,
            metrics: None,
            alerts: None,
            execution_time,
            sources: None,
            error: Some(message.into()),
        }
    }
}
