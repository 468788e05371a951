//! Plan compiler
//!
//! Maps confirmed requirements onto task templates through a fixed, ordered
//! rule table. Dependencies are recorded on each task for observers; the
//! executor runs tasks in list order.

use crate::models::{now_millis, AgentType, ExecutionPlan, QueryAnalysis, Task, TaskType};
use tracing::info;
use uuid::Uuid;

/// Plans with more tasks than this also require the validation agent.
const VALIDATION_TASK_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy)]
enum DependsOn {
    Nothing,
    ExtractData,
    PriorCalculations,
}

struct TaskRule {
    /// Substring a confirmed requirement must contain.
    needle: &'static str,
    id: &'static str,
    title: &'static str,
    description: &'static str,
    task_type: TaskType,
    depends_on: DependsOn,
}

const RULES: &[TaskRule] = &[
    TaskRule {
        needle: "earnings quality assessment",
        id: "extract-data",
        title: "Extract financial data",
        description: "Pulling financial statements from database",
        task_type: TaskType::Extraction,
        depends_on: DependsOn::Nothing,
    },
    TaskRule {
        needle: "Accruals analysis",
        id: "calculate-accruals",
        title: "Calculate accruals metrics",
        description: "Computing accruals and ratios",
        task_type: TaskType::Calculation,
        depends_on: DependsOn::ExtractData,
    },
    TaskRule {
        needle: "Cash flow to net income",
        id: "calculate-cf-ratio",
        title: "Analyze cash flow ratios",
        description: "Comparing operating cash flow to net income",
        task_type: TaskType::Calculation,
        depends_on: DependsOn::ExtractData,
    },
    TaskRule {
        needle: "one-time items",
        id: "identify-onetime",
        title: "Identify one-time items",
        description: "Scanning for non-recurring items affecting earnings",
        task_type: TaskType::Extraction,
        depends_on: DependsOn::ExtractData,
    },
    TaskRule {
        needle: "M-Score",
        id: "calculate-mscore",
        title: "Calculate Beneish M-Score",
        description: "Computing earnings manipulation probability",
        task_type: TaskType::Calculation,
        depends_on: DependsOn::ExtractData,
    },
    TaskRule {
        needle: "quality rating",
        id: "generate-rating",
        title: "Generate quality rating",
        description: "Synthesizing overall earnings quality score",
        task_type: TaskType::Assessment,
        depends_on: DependsOn::PriorCalculations,
    },
    TaskRule {
        needle: "risk identification",
        id: "risk-analysis",
        title: "Identify specific risks",
        description: "Analyzing areas of concern and red flags",
        task_type: TaskType::Assessment,
        depends_on: DependsOn::PriorCalculations,
    },
];

pub struct PlanCompiler;

impl PlanCompiler {
    /// Compile a plan from the analysis' confirmed requirements.
    pub fn compile(query: &str, analysis: QueryAnalysis) -> ExecutionPlan {
        let tasks = Self::build_tasks(&analysis.requirements);
        Self::assemble(query, analysis, tasks)
    }

    /// The canonical earnings-quality plan, independent of requirements.
    pub fn standard_template(query: &str, analysis: QueryAnalysis) -> ExecutionPlan {
        let tasks = vec![
            Task::new(
                "extract-data",
                "Extract financial data",
                "Gathering necessary financial statements",
                TaskType::Extraction,
                vec![],
            )
            .with_subtasks(vec![
                Task::new(
                    "extract-cf",
                    "Extract cash flow statements",
                    "Locating and parsing cash flow data",
                    TaskType::Extraction,
                    vec![],
                ),
                Task::new(
                    "extract-is",
                    "Extract income statements",
                    "Finding revenue and profit information",
                    TaskType::Extraction,
                    vec![],
                ),
                Task::new(
                    "extract-bs",
                    "Extract balance sheets",
                    "Retrieving asset and liability data",
                    TaskType::Extraction,
                    vec![],
                ),
            ]),
            Task::new(
                "calculate-metrics",
                "Calculate financial metrics",
                "Computing key financial indicators",
                TaskType::Calculation,
                vec!["extract-data".to_string()],
            )
            .with_subtasks(vec![
                Task::new(
                    "calc-accruals",
                    "Calculate accruals",
                    "Computing total accruals and ratios",
                    TaskType::Calculation,
                    vec![],
                ),
                Task::new(
                    "calc-cfni",
                    "Calculate CF/NI ratio",
                    "Analyzing cash flow quality",
                    TaskType::Calculation,
                    vec![],
                ),
                Task::new(
                    "calc-mscore",
                    "Calculate M-Score",
                    "Computing manipulation probability",
                    TaskType::Calculation,
                    vec![],
                ),
            ]),
            Task::new(
                "assess-quality",
                "Assess earnings quality",
                "Evaluating overall financial health",
                TaskType::Assessment,
                vec!["calculate-metrics".to_string()],
            ),
            Task::new(
                "generate-report",
                "Generate final report",
                "Synthesizing findings and recommendations",
                TaskType::Report,
                vec!["assess-quality".to_string()],
            ),
        ];

        Self::assemble(query, analysis, tasks)
    }

    pub fn build_tasks(requirements: &[String]) -> Vec<Task> {
        let mut tasks: Vec<Task> = Vec::new();

        for rule in RULES {
            if !requirements.iter().any(|r| r.contains(rule.needle)) {
                continue;
            }

            let dependencies = match rule.depends_on {
                DependsOn::Nothing => vec![],
                DependsOn::ExtractData => vec!["extract-data".to_string()],
                DependsOn::PriorCalculations => tasks
                    .iter()
                    .filter(|t| t.task_type == TaskType::Calculation)
                    .map(|t| t.id.clone())
                    .collect(),
            };

            tasks.push(Task::new(
                rule.id,
                rule.title,
                rule.description,
                rule.task_type,
                dependencies,
            ));
        }

        if !tasks.is_empty() {
            let all_prior = tasks.iter().map(|t| t.id.clone()).collect();
            tasks.push(Task::new(
                "validate-results",
                "Validate analysis",
                "Cross-checking results for accuracy",
                TaskType::Assessment,
                all_prior,
            ));
            tasks.push(Task::new(
                "generate-report",
                "Generate report",
                "Creating comprehensive analysis report",
                TaskType::Report,
                vec!["validate-results".to_string()],
            ));
        }

        tasks
    }

    /// Agent types implied by task and subtask types, in first-seen order.
    pub fn required_agents(tasks: &[Task]) -> Vec<AgentType> {
        let mut agents = Vec::new();

        for task in tasks {
            for t in std::iter::once(task).chain(task.subtasks().iter()) {
                let agent = match t.task_type {
                    TaskType::Extraction => AgentType::DataExtraction,
                    TaskType::Calculation => AgentType::Calculation,
                    TaskType::Assessment => AgentType::Assessment,
                    TaskType::Report => AgentType::Report,
                    TaskType::Analysis => continue,
                };
                if !agents.contains(&agent) {
                    agents.push(agent);
                }
            }
        }

        if tasks.len() > VALIDATION_TASK_THRESHOLD && !agents.contains(&AgentType::Validation) {
            agents.push(AgentType::Validation);
        }

        agents
    }

    pub fn estimate_time(tasks: &[Task]) -> u64 {
        tasks
            .iter()
            .map(|t| {
                t.task_type.estimated_cost()
                    + t.subtasks()
                        .iter()
                        .map(|s| s.task_type.estimated_cost())
                        .sum::<u64>()
            })
            .sum()
    }

    fn assemble(query: &str, analysis: QueryAnalysis, tasks: Vec<Task>) -> ExecutionPlan {
        let agents = Self::required_agents(&tasks);
        let estimated_time = Self::estimate_time(&tasks);

        info!(
            tasks = tasks.len(),
            agents = agents.len(),
            estimated_time,
            "Execution plan compiled"
        );

        ExecutionPlan {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            analysis,
            tasks,
            agents,
            estimated_time,
            created_at: now_millis(),
        }
    }
}
