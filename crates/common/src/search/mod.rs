//! Hybrid search backends
//!
//! The documentation store exposes one fused-ranking operation: it scores
//! the query text with full-text search and the query embedding with
//! vector similarity, then merges both rankings with reciprocal rank
//! fusion. The backends here only invoke it:
//! - Postgres: calls the SQL function directly
//! - RPC: calls the same function through an HTTP RPC gateway

mod postgres;
mod rpc;

pub use postgres::PostgresHybridSearch;
pub use rpc::RpcHybridSearch;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source metadata attached to a passage at ingestion time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitMetadata {
    /// Origin URL of the page the passage was cut from
    #[serde(default, alias = "source_url")]
    pub url: String,

    /// Page title
    #[serde(default)]
    pub title: String,

    /// Document type (manual, script-reference, ...)
    #[serde(default, alias = "type")]
    pub doc_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the passage contains a code snippet
    #[serde(default, alias = "has_code_snippet")]
    pub has_code: bool,
}

/// One candidate passage as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Stable passage identifier
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,

    /// Passage text
    pub content: String,

    #[serde(default)]
    pub metadata: HitMetadata,

    /// Fused relevance score assigned by the backend
    #[serde(default)]
    pub score: f64,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

/// Arguments of the fused-ranking operation
#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchParams {
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    pub match_count: usize,
    pub full_text_weight: f64,
    pub semantic_weight: f64,
    pub rrf_k: u32,
}

/// Trait for hybrid search backends
#[async_trait]
pub trait HybridSearchBackend: Send + Sync {
    /// Run one fused-ranking search, best hit first
    async fn hybrid_search(&self, params: &HybridSearchParams) -> Result<Vec<SearchHit>>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Backend answering from a fixed table of query → hits, for tests and
/// local development. Unknown queries return no hits.
#[derive(Default)]
pub struct StaticSearchBackend {
    hits: HashMap<String, Vec<SearchHit>>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    received: Mutex<Vec<HybridSearchParams>>,
}

impl StaticSearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(query.to_string(), hits);
        self
    }

    pub fn with_failure(mut self, query: &str, message: &str) -> Self {
        self.failures.insert(query.to_string(), message.to_string());
        self
    }

    pub fn with_delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    /// Parameters of every search received so far
    pub fn received(&self) -> Vec<HybridSearchParams> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HybridSearchBackend for StaticSearchBackend {
    async fn hybrid_search(&self, params: &HybridSearchParams) -> Result<Vec<SearchHit>> {
        if let Ok(mut received) = self.received.lock() {
            received.push(params.clone());
        }
        if let Some(delay) = self.delays.get(&params.query_text) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.failures.get(&params.query_text) {
            return Err(AppError::upstream("search", message.clone()));
        }

        let mut hits = self.hits.get(&params.query_text).cloned().unwrap_or_default();
        hits.truncate(params.match_count);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Create the configured search backend
pub fn create_search_backend(
    config: &AppConfig,
    db: Option<DbPool>,
) -> Result<Arc<dyn HybridSearchBackend>> {
    let search = &config.search;
    match search.backend.as_str() {
        "postgres" => {
            let db = db.ok_or_else(|| {
                AppError::config("search.backend=postgres requires a database connection")
            })?;
            Ok(Arc::new(PostgresHybridSearch::new(db, &search.function)?))
        }
        "rpc" => Ok(Arc::new(RpcHybridSearch::new(search)?)),
        "mock" => {
            tracing::warn!("Using static search backend; every query returns no hits");
            Ok(Arc::new(StaticSearchBackend::new()))
        }
        other => Err(AppError::config(format!("unknown search backend '{}'", other))),
    }
}

/// Function names are interpolated into SQL and URLs, so only plain
/// identifiers are accepted.
pub(crate) fn check_function_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(AppError::config(format!("invalid search function name '{}'", name)))
    }
}
