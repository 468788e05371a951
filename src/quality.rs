//! Quality scorer
//!
//! Step-function sub-scores over the calculated metrics, a weighted overall
//! score, a letter grade, and threshold alerts. Deterministic.

use crate::models::{
    Alert, CalculatedMetrics, Grade, Insights, QualityAssessment, Rating, Severity,
};
use tracing::info;

const ACCRUAL_WEIGHT: f64 = 0.35;
const CASH_FLOW_WEIGHT: f64 = 0.35;
const MANIPULATION_WEIGHT: f64 = 0.30;

const CONFIDENCE_COMPLETE: f64 = 0.85;
const CONFIDENCE_PARTIAL: f64 = 0.70;

/// Conventional Beneish cut-off above which manipulation is considered likely.
const M_SCORE_THRESHOLD: f64 = -2.22;

pub fn accrual_score(accruals_ratio: f64) -> u32 {
    let r = accruals_ratio.abs();
    if r < 0.02 {
        95
    } else if r < 0.05 {
        80
    } else if r < 0.10 {
        60
    } else {
        40
    }
}

pub fn cash_flow_score(cf_ni_ratio: f64) -> u32 {
    if cf_ni_ratio > 1.2 {
        95
    } else if cf_ni_ratio > 0.8 {
        80
    } else if cf_ni_ratio > 0.5 {
        60
    } else {
        40
    }
}

pub fn manipulation_score(m_score: f64) -> u32 {
    if m_score < -3.0 {
        95
    } else if m_score < M_SCORE_THRESHOLD {
        80
    } else if m_score < -1.78 {
        60
    } else {
        40
    }
}

pub fn overall_score(accrual: u32, cash_flow: u32, manipulation: u32) -> u32 {
    let weighted = accrual as f64 * ACCRUAL_WEIGHT
        + cash_flow as f64 * CASH_FLOW_WEIGHT
        + manipulation as f64 * MANIPULATION_WEIGHT;
    weighted.round().clamp(0.0, 100.0) as u32
}

pub fn confidence(has_all_data: bool) -> f64 {
    if has_all_data {
        CONFIDENCE_COMPLETE
    } else {
        CONFIDENCE_PARTIAL
    }
}

/// Grade a completed set of metrics.
pub fn assess(metrics: &CalculatedMetrics) -> QualityAssessment {
    let accrual = accrual_score(metrics.accruals_ratio);
    let cash_flow = cash_flow_score(metrics.cf_ni_ratio);
    let manipulation = manipulation_score(metrics.m_score);

    let score = overall_score(accrual, cash_flow, manipulation);
    let grade = Grade::from_score(score);

    info!(score, %grade, accrual, cash_flow, manipulation, "Quality assessment complete");

    QualityAssessment {
        rating: Rating {
            score,
            grade,
            confidence: confidence(metrics.has_all_data),
        },
        alerts: alerts(metrics),
        insights: insights(metrics, accrual, cash_flow, manipulation),
    }
}

fn alert(severity: Severity, metric: &str, message: String) -> Alert {
    Alert {
        severity,
        message,
        metric: Some(metric.to_string()),
    }
}

pub fn alerts(metrics: &CalculatedMetrics) -> Vec<Alert> {
    let mut alerts = Vec::with_capacity(4);

    if !metrics.has_all_data {
        alerts.push(alert(
            Severity::Warning,
            "Data Completeness",
            "Some financial data was not available. Using estimates for missing values.".to_string(),
        ));
    }

    let pct = metrics.accruals_ratio * 100.0;
    let abs_ratio = metrics.accruals_ratio.abs();
    alerts.push(if abs_ratio > 0.10 {
        alert(
            Severity::Error,
            "Accruals Ratio",
            format!("High accruals ratio of {:.2}% indicates potential earnings management", pct),
        )
    } else if abs_ratio > 0.05 {
        alert(
            Severity::Warning,
            "Accruals Ratio",
            format!("Moderate accruals ratio of {:.2}% warrants closer monitoring", pct),
        )
    } else {
        alert(
            Severity::Info,
            "Accruals Ratio",
            format!("Low accruals ratio of {:.2}% indicates earnings are well-backed by cash", pct),
        )
    });

    let cf = metrics.cf_ni_ratio;
    alerts.push(if cf < 0.5 {
        alert(
            Severity::Error,
            "Cash Flow Quality",
            format!("Poor cash conversion with CF/NI ratio of {:.2}", cf),
        )
    } else if cf < 0.8 {
        alert(
            Severity::Warning,
            "Cash Flow Quality",
            format!("Below-average cash conversion with CF/NI ratio of {:.2}", cf),
        )
    } else if cf > 1.2 {
        alert(
            Severity::Info,
            "Cash Flow Quality",
            format!("Excellent cash generation with CF/NI ratio of {:.2}", cf),
        )
    } else {
        alert(
            Severity::Info,
            "Cash Flow Quality",
            format!("Adequate cash conversion with CF/NI ratio of {:.2}", cf),
        )
    });

    let m = metrics.m_score;
    alerts.push(if m > M_SCORE_THRESHOLD {
        alert(
            Severity::Warning,
            "Beneish M-Score",
            format!("M-Score of {:.2} is above threshold, indicating higher manipulation risk", m),
        )
    } else {
        alert(
            Severity::Info,
            "Beneish M-Score",
            format!(
                "M-Score of {:.2} is well below threshold, indicating low manipulation risk",
                m
            ),
        )
    });

    alerts
}

fn insights(
    metrics: &CalculatedMetrics,
    accrual: u32,
    cash_flow: u32,
    manipulation: u32,
) -> Insights {
    let pct = metrics.accruals_ratio * 100.0;
    let accrual_quality = match accrual {
        s if s >= 85 => format!(
            "Excellent accrual quality with {:.2}% ratio. Earnings are strongly backed by cash.",
            pct
        ),
        s if s >= 70 => format!(
            "Good accrual quality with {:.2}% ratio. Earnings show reasonable cash backing.",
            pct
        ),
        s if s >= 50 => format!(
            "Moderate accrual quality with {:.2}% ratio. Some divergence between earnings and cash.",
            pct
        ),
        _ => format!(
            "Poor accrual quality with {:.2}% ratio. Significant gap between reported earnings and cash.",
            pct
        ),
    };

    let cf = metrics.cf_ni_ratio;
    let cash_flow_quality = match cash_flow {
        s if s >= 85 => format!(
            "Outstanding cash generation with {:.2}x coverage. Operating cash flow exceeds net income.",
            cf
        ),
        s if s >= 70 => format!(
            "Solid cash conversion with {:.2}x coverage. Most earnings are converting to cash.",
            cf
        ),
        s if s >= 50 => format!(
            "Adequate cash flow with {:.2}x coverage. Some earnings not converting to cash.",
            cf
        ),
        _ => format!(
            "Weak cash generation with {:.2}x coverage. Earnings quality is questionable.",
            cf
        ),
    };

    let m = metrics.m_score;
    let manipulation_risk = match manipulation {
        s if s >= 85 => format!(
            "Very low manipulation risk with M-Score of {:.2}. No signs of earnings management detected.",
            m
        ),
        s if s >= 70 => format!(
            "Low manipulation risk with M-Score of {:.2}. Financial reporting appears reliable.",
            m
        ),
        s if s >= 50 => format!(
            "Moderate manipulation risk with M-Score of {:.2}. Some red flags present.",
            m
        ),
        _ => format!(
            "High manipulation risk with M-Score of {:.2}. Multiple warning signs detected.",
            m
        ),
    };

    let mean = (accrual + cash_flow + manipulation) as f64 / 3.0;
    let overall_assessment = if mean >= 85.0 {
        "Overall earnings quality is excellent. The company shows strong cash generation, low accruals, and no signs of manipulation."
    } else if mean >= 70.0 {
        "Overall earnings quality is good. The company demonstrates solid fundamentals with minor areas for improvement."
    } else if mean >= 50.0 {
        "Overall earnings quality is moderate. Several yellow flags require monitoring before investment decisions."
    } else {
        "Overall earnings quality is poor. Multiple red flags indicate potential earnings management or financial distress."
    }
    .to_string();

    Insights {
        accrual_quality,
        cash_flow_quality,
        manipulation_risk,
        overall_assessment,
    }
}
