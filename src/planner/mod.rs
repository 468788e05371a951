//! Query analysis and plan compilation
//!
//! A `QueryAnalyzer` turns free text into a `QueryAnalysis` (the natural
//! language service is an external collaborator). The `PlanCompiler` turns
//! confirmed requirements into an executable task graph.

use crate::companies;
use crate::models::{Entities, QueryAnalysis};
use crate::Result;
use async_trait::async_trait;

pub mod cache;
pub mod compiler;
pub mod http;

pub use cache::CachedAnalyzer;
pub use compiler::PlanCompiler;
pub use http::HttpQueryAnalyzer;

pub const EARNINGS_QUALITY_INTENT: &str = "earnings_quality_analysis";
pub const DEFAULT_CONFIDENCE: f64 = 0.92;

/// Trait for query analysis (external NL service or local rules)
#[async_trait]
pub trait QueryAnalyzer: Send + Sync {
    /// Analyze a query. When `confirmed` is given those requirements are used
    /// verbatim and no live analysis takes place.
    async fn analyze(&self, query: &str, confirmed: Option<&[String]>) -> Result<QueryAnalysis>;
}

/// Requirement catalog: any of the query substrings selects the requirement.
const REQUIREMENT_CATALOG: &[(&[&str], &str)] = &[
    (&["earnings quality"], "Comprehensive earnings quality assessment"),
    (&["red flags", "accruals"], "Accruals analysis and red flag detection"),
    (&["cash flow", "net income"], "Cash flow to net income comparison"),
    (&["one-time", "items"], "Identification of one-time items"),
    (&["m-score", "beneish"], "Beneish M-Score calculation"),
    (&["rating", "quality rating"], "Overall quality rating generation"),
    (&["concerns", "specific concerns"], "Specific risk identification"),
];

const METRIC_KEYWORDS: &[(&str, &str)] = &[
    ("accrual", "accruals"),
    ("cash flow", "cash_flow"),
    ("net income", "net_income"),
    ("m-score", "m_score"),
    ("revenue", "revenue"),
    ("profit", "profit"),
];

/// Requirements implied by a query, in catalog order.
pub fn extract_requirements(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();

    REQUIREMENT_CATALOG
        .iter()
        .filter(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(_, requirement)| requirement.to_string())
        .collect()
}

pub fn extract_entities(query: &str) -> Entities {
    let lowered = query.to_lowercase();

    let metrics = METRIC_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, metric)| metric.to_string())
        .collect();

    let timeframe = if lowered.contains("quarterly") {
        "quarterly"
    } else if lowered.contains("annual") {
        "annual"
    } else {
        "latest"
    };

    Entities {
        company: companies::mentioned_in(query).map(|c| c.name.to_string()),
        metrics: Some(metrics),
        timeframe: Some(timeframe.to_string()),
    }
}

/// Rule-based analyzer over the requirement catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn analyze_sync(&self, query: &str, confirmed: Option<&[String]>) -> QueryAnalysis {
        let requirements = match confirmed {
            Some(reqs) => reqs.to_vec(),
            None => extract_requirements(query),
        };

        QueryAnalysis::new(
            EARNINGS_QUALITY_INTENT,
            requirements,
            extract_entities(query),
            DEFAULT_CONFIDENCE,
        )
    }
}

#[async_trait]
impl QueryAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, query: &str, confirmed: Option<&[String]>) -> Result<QueryAnalysis> {
        Ok(self.analyze_sync(query, confirmed))
    }
}
