//! Runtime configuration
//!
//! Read from the environment (after `.env` is loaded by the binaries).

use crate::error::OrchestrationError;
use crate::extraction::DEFAULT_FETCH_LIMIT;
use crate::planner::cache::DEFAULT_CAPACITY;
use crate::stream::{DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_THRESHOLD};
use crate::Result;
use std::env;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub analysis_service_url: Option<String>,
    pub table_fetch_limit: usize,
    pub stream_chunk_threshold: usize,
    pub stream_chunk_size: usize,
    pub pacing_ms: u64,
    pub analysis_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            analysis_service_url: None,
            table_fetch_limit: DEFAULT_FETCH_LIMIT,
            stream_chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            stream_chunk_size: DEFAULT_CHUNK_SIZE,
            pacing_ms: 0,
            analysis_cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            port: parse_or(get("PORT").or_else(|| get("API_PORT")), "PORT", defaults.port)?,
            database_url: get("DATABASE_URL"),
            analysis_service_url: get("ANALYSIS_SERVICE_URL"),
            table_fetch_limit: parse_or(
                get("TABLE_FETCH_LIMIT"),
                "TABLE_FETCH_LIMIT",
                defaults.table_fetch_limit,
            )?,
            stream_chunk_threshold: parse_or(
                get("STREAM_CHUNK_THRESHOLD"),
                "STREAM_CHUNK_THRESHOLD",
                defaults.stream_chunk_threshold,
            )?,
            stream_chunk_size: parse_or(
                get("STREAM_CHUNK_SIZE"),
                "STREAM_CHUNK_SIZE",
                defaults.stream_chunk_size,
            )?,
            pacing_ms: parse_or(get("PACING_MS"), "PACING_MS", defaults.pacing_ms)?,
            analysis_cache_capacity: parse_or(
                get("ANALYSIS_CACHE_CAPACITY"),
                "ANALYSIS_CACHE_CAPACITY",
                defaults.analysis_cache_capacity,
            )?,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| {
                OrchestrationError::ConfigError(format!("{} must be a number, got {:?}", key, raw))
            }),
    }
}
