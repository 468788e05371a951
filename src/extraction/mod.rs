//! Statement table access and shaping
//!
//! The table store is an external collaborator: it returns raw statement
//! tables for a company and category. The shaper turns those rows into named
//! numeric fields.

use crate::models::{RawTable, StatementCategory, TableMetadata};
use crate::Result;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod postgres;
pub mod shaper;

pub use postgres::PgTableStore;
pub use shaper::{parse_number, DataShaper};

/// Most-recent tables considered per statement category.
pub const DEFAULT_FETCH_LIMIT: usize = 10;

/// Trait for the relational table store
#[async_trait::async_trait]
pub trait TableStore: Send + Sync {
    /// Tables for `company_code` matching `category`, most recent first.
    async fn fetch_tables(
        &self,
        company_code: &str,
        category: StatementCategory,
        limit: usize,
    ) -> Result<Vec<RawTable>>;

    /// Whether the backing store is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// In-memory table store for development and tests
pub struct InMemoryTableStore {
    tables: Arc<RwLock<HashMap<(String, StatementCategory), Vec<RawTable>>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a table under a company and category, after any already present.
    pub async fn insert(&self, company_code: &str, category: StatementCategory, table: RawTable) {
        let mut tables = self.tables.write().await;
        tables
            .entry((company_code.to_string(), category))
            .or_insert_with(Vec::new)
            .push(table);
    }

    /// Load `sample_statements` under `company_code`.
    pub async fn seed_samples(&self, company_code: &str) {
        for (category, table) in sample_statements() {
            self.insert(company_code, category, table).await;
        }
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Quarterly statements of the demo company, as the table store returns them.
pub fn sample_statements() -> Vec<(StatementCategory, RawTable)> {
    fn table(
        id: &str,
        page_number: i32,
        title_en: &str,
        title_ko: &str,
        data: serde_json::Value,
    ) -> RawTable {
        RawTable {
            id: id.to_string(),
            source_file: "samsung_2024_q3_report.pdf".to_string(),
            page_number,
            metadata: TableMetadata {
                statement_type: Some("consolidated".to_string()),
                table_title_en: Some(title_en.to_string()),
                table_title_ko: Some(title_ko.to_string()),
                period_start: Some("2024-07-01".to_string()),
                period_end: Some("2024-09-30".to_string()),
                ..Default::default()
            },
            data,
        }
    }

    vec![
        (
            StatementCategory::CashFlow,
            table(
                "cf-1",
                42,
                "Consolidated Statements of Cash Flows",
                "연결 현금흐름표",
                json!([
                    ["구분", "2023 3Q", "2024 3Q"],
                    ["당기순이익", "15,487,100", "36,519,534"],
                    ["영업활동으로 인한 현금흐름", "30,112,000", "34,640,421"],
                ]),
            ),
        ),
        (
            StatementCategory::IncomeStatement,
            table(
                "is-1",
                38,
                "Consolidated Statements of Income",
                "연결 손익계산서",
                json!([
                    ["구분", "2023 3Q", "2024 3Q"],
                    ["매출액", "67,404,652", "79,098,726"],
                    ["영업이익", "2,433,567", "9,183,417"],
                    ["당기순이익", "5,844,929", "10,100,943"],
                ]),
            ),
        ),
        (
            StatementCategory::BalanceSheet,
            table(
                "bs-1",
                36,
                "Consolidated Statements of Financial Position",
                "연결 재무상태표",
                json!([
                    ["구분", "2023.12.31", "2024.09.30"],
                    ["자산총계", "455,905,980", "456,789,012"],
                    ["부채총계", "92,228,115", "102,231,496"],
                    ["자본총계", "363,677,865", "354,557,516"],
                ]),
            ),
        ),
    ]
}

#[async_trait::async_trait]
impl TableStore for InMemoryTableStore {
    async fn fetch_tables(
        &self,
        company_code: &str,
        category: StatementCategory,
        limit: usize,
    ) -> Result<Vec<RawTable>> {
        let tables = self.tables.read().await;

        Ok(tables
            .get(&(company_code.to_string(), category))
            .map(|found| found.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
