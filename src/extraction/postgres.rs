//! Postgres-backed table store
//!
//! Tables live in a single `tables` relation with JSONB `data` and
//! `metadata` columns. Each statement category is matched by title and
//! serialized-row keywords in English and Korean.

use super::TableStore;
use crate::error::OrchestrationError;
use crate::models::{RawTable, StatementCategory, TableMetadata};
use crate::Result;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, error};

const CASH_FLOW_FILTER: &str = r#"
    metadata->>'table_title_en' ILIKE '%cash%flow%'
    OR metadata->>'table_title_ko' ILIKE '%현금%흐름%'
    OR data::text ILIKE '%영업활동%현금%'
    OR data::text ILIKE '%당기순이익%'
"#;

const INCOME_STATEMENT_FILTER: &str = r#"
    metadata->>'table_title_en' ILIKE '%income%statement%'
    OR metadata->>'table_title_ko' ILIKE '%손익%계산%'
    OR metadata->>'table_title_en' ILIKE '%comprehensive%income%'
    OR data::text ILIKE '%매출액%'
    OR data::text ILIKE '%영업이익%'
"#;

const BALANCE_SHEET_FILTER: &str = r#"
    metadata->>'table_title_en' ILIKE '%balance%sheet%'
    OR metadata->>'table_title_en' ILIKE '%financial%position%'
    OR metadata->>'table_title_ko' ILIKE '%재무%상태%'
    OR data::text ILIKE '%자산총계%'
    OR data::text ILIKE '%부채총계%'
"#;

fn category_filter(category: StatementCategory) -> &'static str {
    match category {
        StatementCategory::CashFlow => CASH_FLOW_FILTER,
        StatementCategory::IncomeStatement => INCOME_STATEMENT_FILTER,
        StatementCategory::BalanceSheet => BALANCE_SHEET_FILTER,
    }
}

fn category_query(category: StatementCategory) -> String {
    format!(
        r#"
        SELECT id::text AS id, source_file, page_number, data, metadata
        FROM tables
        WHERE corp_code = $1
          AND ({})
        ORDER BY source_file DESC, page_number ASC
        LIMIT $2
        "#,
        category_filter(category)
    )
}

fn row_to_table(row: &PgRow) -> Result<RawTable> {
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    let data: Option<serde_json::Value> = row.try_get("data")?;
    let source_file: Option<String> = row.try_get("source_file")?;
    let page_number: Option<i32> = row.try_get("page_number")?;

    Ok(RawTable {
        id: row.try_get("id")?,
        source_file: source_file.unwrap_or_default(),
        page_number: page_number.unwrap_or_default(),
        metadata: metadata
            .and_then(|m| serde_json::from_value::<TableMetadata>(m).ok())
            .unwrap_or_default(),
        data: data.unwrap_or(serde_json::Value::Null),
    })
}

pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .idle_timeout(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(2))
            .connect(database_url)
            .await
            .map_err(|e| {
                OrchestrationError::TableStoreError(
                    format!("Failed to connect to table store: {}", e),
                )
            })?;

        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl TableStore for PgTableStore {
    async fn fetch_tables(
        &self,
        company_code: &str,
        category: StatementCategory,
        limit: usize,
    ) -> Result<Vec<RawTable>> {
        let sql = category_query(category);

        let rows = sqlx::query(&sql)
            .bind(company_code)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(?category, error = %e, "Table store query failed");
                OrchestrationError::DatabaseError(e)
            })?;

        debug!(?category, rows = rows.len(), "Fetched statement tables");

        rows.iter().map(row_to_table).collect()
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_queries_are_scoped_and_limited() {
        for category in StatementCategory::ALL {
            let sql = category_query(category);
            assert!(sql.contains("corp_code = $1"));
            assert!(sql.contains("LIMIT $2"));
            assert!(sql.contains("ORDER BY source_file DESC"));
        }

        assert!(category_query(StatementCategory::CashFlow).contains("현금%흐름"));
        assert!(category_query(StatementCategory::IncomeStatement).contains("매출액"));
        assert!(category_query(StatementCategory::BalanceSheet).contains("자산총계"));
    }
}
