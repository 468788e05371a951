//! HTTP-backed query analyzer
//!
//! Posts `{query}` to the natural language analysis service and accepts a
//! `QueryAnalysis`-shaped body. Complexity is always recomputed locally.

use super::{
    extract_entities, QueryAnalyzer, KeywordAnalyzer, DEFAULT_CONFIDENCE,
    EARNINGS_QUALITY_INTENT,
};
use crate::error::OrchestrationError;
use crate::models::{Entities, QueryAnalysis};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
struct ServiceAnalysis {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    entities: Option<Entities>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl ServiceAnalysis {
    fn into_analysis(self, query: &str) -> QueryAnalysis {
        QueryAnalysis::new(
            self.intent
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| EARNINGS_QUALITY_INTENT.to_string()),
            self.requirements,
            self.entities.unwrap_or_else(|| extract_entities(query)),
            self.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        )
    }
}

#[derive(Clone)]
pub struct HttpQueryAnalyzer {
    client: Client,
    endpoint: String,
}

impl HttpQueryAnalyzer {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QueryAnalyzer for HttpQueryAnalyzer {
    async fn analyze(&self, query: &str, confirmed: Option<&[String]>) -> Result<QueryAnalysis> {
        if confirmed.is_some() {
            return Ok(KeywordAnalyzer.analyze_sync(query, confirmed));
        }

        debug!(endpoint = %self.endpoint, "Requesting query analysis");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Analysis service request failed");
                OrchestrationError::AnalysisServiceError(format!("Request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::AnalysisServiceError(format!(
                "Service returned {}: {}",
                status, body
            )));
        }

        let parsed = response.json::<ServiceAnalysis>().await.map_err(|e| {
            OrchestrationError::AnalysisServiceError(format!("Invalid analysis response: {}", e))
        })?;

        Ok(parsed.into_analysis(query))
    }
}
