//! Analysis cache
//!
//! Results are keyed by the SHA-256 of the normalized query. The cache is
//! bounded and evicts the oldest entry first.

use super::QueryAnalyzer;
use crate::models::QueryAnalysis;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 500;

pub fn cache_key(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct Entries {
    values: HashMap<String, QueryAnalysis>,
    order: VecDeque<String>,
}

pub struct CachedAnalyzer<A> {
    inner: A,
    capacity: usize,
    entries: RwLock<Entries>,
}

impl<A: QueryAnalyzer> CachedAnalyzer<A> {
    pub fn new(inner: A, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: RwLock::new(Entries::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<A: QueryAnalyzer> QueryAnalyzer for CachedAnalyzer<A> {
    async fn analyze(&self, query: &str, confirmed: Option<&[String]>) -> Result<QueryAnalysis> {
        if confirmed.is_some() {
            return self.inner.analyze(query, confirmed).await;
        }

        let key = cache_key(query);
        if let Some(hit) = self.entries.read().await.values.get(&key) {
            debug!(key = %key, "Analysis cache hit");
            return Ok(hit.clone());
        }

        let analysis = self.inner.analyze(query, None).await?;

        let mut entries = self.entries.write().await;
        if !entries.values.contains_key(&key) {
            while entries.order.len() >= self.capacity {
                if let Some(oldest) = entries.order.pop_front() {
                    entries.values.remove(&oldest);
                }
            }
            entries.order.push_back(key.clone());
        }
        entries.values.insert(key, analysis.clone());

        Ok(analysis)
    }
}
