//! Data shaper: raw statement rows to named numeric fields
//!
//! Each row is an array of cells whose first cell is the line-item label and
//! whose last cell is taken as the most recent period. Labels are matched
//! case-insensitively against English and Korean keywords.

use super::TableStore;
use crate::models::{
    BalanceSheetRecord, CashFlowRecord, ExtractedData, IncomeStatementRecord, RawTable,
    SourceInfo, StatementCategory,
};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Label matcher for one target field.
struct FieldRule {
    any: &'static [&'static str],
    all: &'static [&'static str],
}

impl FieldRule {
    fn matches(&self, label: &str) -> bool {
        self.any.iter().any(|k| label.contains(k))
            || (!self.all.is_empty() && self.all.iter().all(|k| label.contains(k)))
    }
}

const NET_INCOME: FieldRule = FieldRule {
    any: &["net income", "당기순이익"],
    all: &[],
};
const OPERATING_CASH_FLOW: FieldRule = FieldRule {
    any: &["operating activities", "cash flows from operating"],
    all: &["영업활동", "현금흐름"],
};
const REVENUE: FieldRule = FieldRule {
    any: &["revenue", "sales", "매출액", "매출"],
    all: &[],
};
const OPERATING_PROFIT: FieldRule = FieldRule {
    any: &["operating profit", "operating income", "영업이익"],
    all: &[],
};
const INCOME_NET_INCOME: FieldRule = FieldRule {
    any: &["net income", "net profit", "당기순이익"],
    all: &[],
};
const TOTAL_ASSETS: FieldRule = FieldRule {
    any: &["total assets", "자산총계"],
    all: &[],
};
const TOTAL_LIABILITIES: FieldRule = FieldRule {
    any: &["total liabilities", "부채총계"],
    all: &[],
};
const TOTAL_EQUITY: FieldRule = FieldRule {
    any: &["total equity", "total shareholders", "자본총계"],
    all: &[],
};

/// Parse a statement cell into a number.
///
/// Everything except digits, `-`, `.`, `,` and parentheses is dropped; a
/// value containing both parentheses is negated; commas are removed. The
/// longest leading decimal literal is used. Returns `None` when no digits
/// can be read.
pub fn parse_number(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Null => return None,
        Value::Number(n) => return n.as_f64(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | ',' | '(' | ')'))
        .collect();

    if cleaned.contains('(') && cleaned.contains(')') {
        cleaned = format!("-{}", cleaned.replace(['(', ')'], ""));
    }
    cleaned.retain(|c| c != ',');

    leading_decimal(&cleaned)
}

/// Longest prefix of the form `-?digits(.digits)?` holding at least one digit.
fn leading_decimal(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if bytes.first() == Some(&b'-') {
        end = 1;
    }

    let mut digits = 0;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => digits += 1,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }

    if digits == 0 {
        return None;
    }
    s[..end].trim_end_matches('.').parse().ok()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

/// Labelled rows of a table: the lowered label and the last cell.
fn labelled_rows(table: &RawTable) -> Vec<(String, &Value)> {
    let Some(rows) = table.data.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let cells = row.as_array()?;
            if cells.len() < 2 {
                return None;
            }
            Some((cell_text(&cells[0]), &cells[cells.len() - 1]))
        })
        .collect()
}

/// Scan `tables` in order and return the fields of the first table that
/// yields any of them. Later matching rows overwrite earlier ones.
fn first_table_with<const N: usize>(
    tables: &[RawTable],
    rules: [&FieldRule; N],
) -> Option<([Option<f64>; N], SourceInfo)> {
    for table in tables {
        if !table.data.is_array() {
            continue;
        }

        let mut values = [None; N];
        for (label, last) in labelled_rows(table) {
            for (slot, rule) in values.iter_mut().zip(rules.iter()) {
                if rule.matches(&label) {
                    *slot = parse_number(last);
                }
            }
        }

        if values.iter().any(Option::is_some) {
            return Some((values, source_info(table)));
        }
    }
    None
}

fn source_info(table: &RawTable) -> SourceInfo {
    SourceInfo {
        period: table
            .metadata
            .period_end
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "Latest".to_string()),
        source: if table.source_file.is_empty() {
            "Unknown".to_string()
        } else {
            table.source_file.clone()
        },
        page_number: table.page_number,
    }
}

pub fn shape_cash_flow(tables: &[RawTable]) -> Option<CashFlowRecord> {
    first_table_with(tables, [&NET_INCOME, &OPERATING_CASH_FLOW]).map(
        |([net_income, operating_cash_flow], source)| CashFlowRecord {
            net_income,
            operating_cash_flow,
            source,
        },
    )
}

pub fn shape_income_statement(tables: &[RawTable]) -> Option<IncomeStatementRecord> {
    first_table_with(tables, [&REVENUE, &OPERATING_PROFIT, &INCOME_NET_INCOME]).map(
        |([revenue, operating_profit, net_income], source)| IncomeStatementRecord {
            revenue,
            operating_profit,
            net_income,
            source,
        },
    )
}

pub fn shape_balance_sheet(tables: &[RawTable]) -> Option<BalanceSheetRecord> {
    first_table_with(tables, [&TOTAL_ASSETS, &TOTAL_LIABILITIES, &TOTAL_EQUITY]).map(
        |([total_assets, total_liabilities, total_equity], source)| BalanceSheetRecord {
            total_assets,
            total_liabilities,
            total_equity,
            source,
        },
    )
}

/// Fetches statement tables from the store and shapes them per category.
pub struct DataShaper {
    store: Arc<dyn TableStore>,
    fetch_limit: usize,
}

impl DataShaper {
    pub fn new(store: Arc<dyn TableStore>, fetch_limit: usize) -> Self {
        Self { store, fetch_limit }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Extract all three statements for a company.
    pub async fn extract(&self, company_code: &str) -> Result<ExtractedData> {
        info!(company_code, "Extracting financial statements");

        let cash_flow_tables = self
            .store
            .fetch_tables(company_code, StatementCategory::CashFlow, self.fetch_limit)
            .await?;
        let income_tables = self
            .store
            .fetch_tables(company_code, StatementCategory::IncomeStatement, self.fetch_limit)
            .await?;
        let balance_tables = self
            .store
            .fetch_tables(company_code, StatementCategory::BalanceSheet, self.fetch_limit)
            .await?;

        debug!(
            cash_flow = cash_flow_tables.len(),
            income_statement = income_tables.len(),
            balance_sheet = balance_tables.len(),
            "Statement tables fetched"
        );

        let data = ExtractedData {
            cash_flow: shape_cash_flow(&cash_flow_tables),
            income_statement: shape_income_statement(&income_tables),
            balance_sheet: shape_balance_sheet(&balance_tables),
            raw_tables: cash_flow_tables
                .into_iter()
                .chain(income_tables)
                .chain(balance_tables)
                .collect(),
        };

        info!(
            has_cash_flow = data.cash_flow.is_some(),
            has_income_statement = data.income_statement.is_some(),
            has_balance_sheet = data.balance_sheet.is_some(),
            "Extraction complete"
        );

        Ok(data)
    }
}
