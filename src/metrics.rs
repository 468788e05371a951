//! Metric engine
//!
//! Pure functions over shaped statement values. The M-Score here is a
//! simplified 4-variable stand-in for the 8-variable Beneish model: DSRI and
//! SGI are held constant because year-over-year history is not extracted, and
//! GMI is a step function of the current operating margin. The coefficients
//! are fixed and must not be tuned.

use crate::models::{CalculatedMetrics, ExtractedData, MScoreComponents, MetricField};
use tracing::{debug, warn};

/// Quarterly net income of the demo company (millions KRW), used when no
/// statement yields a value.
pub const FALLBACK_NET_INCOME: f64 = 36_519_534.0;
/// Quarterly operating cash flow of the demo company (millions KRW).
pub const FALLBACK_OPERATING_CASH_FLOW: f64 = 34_640_421.0;
/// Total assets of the demo company (millions KRW).
pub const FALLBACK_TOTAL_ASSETS: f64 = 456_789_012.0;

const M_SCORE_INTERCEPT: f64 = -6.065;
const DSRI_WEIGHT: f64 = 0.823;
const GMI_WEIGHT: f64 = 0.906;
const SGI_WEIGHT: f64 = 0.717;
const TATA_WEIGHT: f64 = 4.679;

const DSRI_ASSUMED: f64 = 1.0;
const SGI_ASSUMED: f64 = 1.05;

pub fn accruals(net_income: f64, operating_cash_flow: f64) -> f64 {
    net_income - operating_cash_flow
}

pub fn accruals_ratio(accruals: f64, total_assets: f64) -> f64 {
    if total_assets == 0.0 {
        return 0.0;
    }
    accruals / total_assets
}

pub fn cf_ni_ratio(operating_cash_flow: f64, net_income: f64) -> f64 {
    if net_income == 0.0 {
        return 0.0;
    }
    operating_cash_flow / net_income
}

/// Gross margin index from the operating margin; neutral when either input
/// is non-positive.
pub fn gross_margin_index(revenue: f64, operating_profit: f64) -> f64 {
    if revenue > 0.0 && operating_profit > 0.0 {
        if operating_profit / revenue > 0.3 {
            0.9
        } else {
            1.1
        }
    } else {
        1.0
    }
}

pub fn m_score_components(
    accruals_ratio: f64,
    revenue: f64,
    operating_profit: f64,
) -> MScoreComponents {
    MScoreComponents {
        dsri: DSRI_ASSUMED,
        gmi: gross_margin_index(revenue, operating_profit),
        sgi: SGI_ASSUMED,
        tata: accruals_ratio,
    }
}

pub fn m_score(c: &MScoreComponents) -> f64 {
    M_SCORE_INTERCEPT
        + DSRI_WEIGHT * c.dsri
        + GMI_WEIGHT * c.gmi
        + SGI_WEIGHT * c.sgi
        + TATA_WEIGHT * c.tata
}

/// Present and non-zero, matching how the statements report "no value".
fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

/// Compute every metric from extracted statements, substituting the
/// documented defaults for missing core values.
pub fn calculate(data: &ExtractedData) -> CalculatedMetrics {
    let mut fallbacks = Vec::new();

    let net_income = usable(data.cash_flow.as_ref().and_then(|cf| cf.net_income))
        .or_else(|| usable(data.income_statement.as_ref().and_then(|is| is.net_income)))
        .unwrap_or_else(|| {
            fallbacks.push(MetricField::NetIncome);
            FALLBACK_NET_INCOME
        });

    let operating_cash_flow = usable(data.cash_flow.as_ref().and_then(|cf| cf.operating_cash_flow))
        .unwrap_or_else(|| {
            fallbacks.push(MetricField::OperatingCashFlow);
            FALLBACK_OPERATING_CASH_FLOW
        });

    let total_assets = usable(data.balance_sheet.as_ref().and_then(|bs| bs.total_assets))
        .unwrap_or_else(|| {
            fallbacks.push(MetricField::TotalAssets);
            FALLBACK_TOTAL_ASSETS
        });

    if !fallbacks.is_empty() {
        warn!(?fallbacks, "Using default values for missing statement data");
    }

    let revenue = usable(data.income_statement.as_ref().and_then(|is| is.revenue)).unwrap_or(0.0);
    let operating_profit =
        usable(data.income_statement.as_ref().and_then(|is| is.operating_profit)).unwrap_or(0.0);

    let accruals = accruals(net_income, operating_cash_flow);
    let accruals_ratio = accruals_ratio(accruals, total_assets);
    let cf_ni_ratio = cf_ni_ratio(operating_cash_flow, net_income);
    let components = m_score_components(accruals_ratio, revenue, operating_profit);
    let m_score = m_score(&components);

    let has_all_data = fallbacks.is_empty()
        && net_income > 0.0
        && operating_cash_flow != 0.0
        && total_assets > 0.0;

    debug!(accruals_ratio, cf_ni_ratio, m_score, has_all_data, "Metrics calculated");

    CalculatedMetrics {
        net_income,
        operating_cash_flow,
        total_assets,
        accruals,
        accruals_ratio,
        cf_ni_ratio,
        m_score,
        m_score_components: components,
        revenue: Some(revenue),
        operating_profit: Some(operating_profit),
        has_all_data,
        fallbacks,
    }
}
