//! Earnings Quality Orchestrator
//!
//! A financial analysis service that:
//! - Turns a natural-language question into requirements and a task plan
//! - Extracts cash flow, income statement and balance sheet figures from stored tables
//! - Computes accruals, cash-flow coverage and a simplified Beneish M-Score
//! - Grades earnings quality with alerts and insights
//! - Streams every step of a run to the client as it happens
//!
//! RUN LOOP:
//! ANALYZE → PLAN → EXTRACT → CALCULATE → ASSESS → REPORT

pub mod agent;
pub mod api;
pub mod companies;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod extraction;
pub mod metrics;
pub mod models;
pub mod planner;
pub mod quality;
pub mod stream;

pub use error::Result;

// Re-export common types
pub use agent::{AnalysisRequest, Orchestrator, RunOutcome};
pub use config::AppConfig;
pub use models::*;
