//! Hybrid retrieval
//!
//! Each query is embedded, then handed to the backend's fused-ranking
//! search together with its raw text. All queries of one request run
//! concurrently; results come back in query order, not completion order.

use crate::errors::{attribute, embedding, search};
use crate::model::ExpandedQuery;
use docsage_common::config::SearchConfig;
use docsage_common::embeddings::Embedder;
use docsage_common::errors::{with_timeout, Result};
use docsage_common::metrics;
use docsage_common::search::{HybridSearchBackend, HybridSearchParams, SearchHit};
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Search parameters fixed for the lifetime of the client
#[derive(Debug, Clone)]
struct SearchSettings {
    match_count: usize,
    full_text_weight: f64,
    semantic_weight: f64,
    rrf_k: u32,
    timeout: Duration,
    isolate_failures: bool,
}

pub struct HybridSearchClient {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn HybridSearchBackend>,
    settings: SearchSettings,
    embedding_timeout: Duration,
}

impl HybridSearchClient {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn HybridSearchBackend>,
        config: &SearchConfig,
        embedding_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            backend,
            settings: SearchSettings {
                match_count: config.match_count,
                full_text_weight: config.full_text_weight,
                semantic_weight: config.semantic_weight,
                rrf_k: config.rrf_k,
                timeout: Duration::from_secs(config.timeout_secs),
                isolate_failures: config.isolate_failures,
            },
            embedding_timeout,
        }
    }

    /// Embed one query and run it through the backend, best hit first
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query_embedding = with_timeout(
            "embedding",
            self.embedding_timeout,
            self.embedder.embed(query),
        )
        .await
        .map_err(|e| attribute(e, embedding))?;

        let params = HybridSearchParams {
            query_text: query.to_string(),
            query_embedding,
            match_count: self.settings.match_count,
            full_text_weight: self.settings.full_text_weight,
            semantic_weight: self.settings.semantic_weight,
            rrf_k: self.settings.rrf_k,
        };

        let hits = with_timeout("search", self.settings.timeout, self.backend.hybrid_search(&params))
            .await
            .map_err(|e| attribute(e, search))?;

        debug!(hits = hits.len(), "Search completed");
        metrics::record_search_hits(hits.len());
        Ok(hits)
    }

    /// Search every query concurrently. The result at position `i` belongs
    /// to `queries[i]`.
    ///
    /// Without failure isolation the first error fails the batch and the
    /// remaining searches are dropped. With isolation a failing query
    /// contributes no hits.
    pub async fn search_all(&self, queries: &[ExpandedQuery]) -> Result<Vec<Vec<SearchHit>>> {
        if !self.settings.isolate_failures {
            return try_join_all(queries.iter().map(|q| self.search(&q.text))).await;
        }

        let results = join_all(queries.iter().map(|q| self.search(&q.text))).await;
        Ok(results
            .into_iter()
            .zip(queries)
            .map(|(result, query)| match result {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query = %query.text, error = %e, "Search failed, continuing without its results");
                    metrics::record_isolated_search_failure();
                    Vec::new()
                }
            })
            .collect())
    }
}
