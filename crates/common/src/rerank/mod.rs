//! Reranking service abstraction
//!
//! A cross-encoder service scores each passage against a query and returns
//! `(original index, relevance score)` pairs, best first.

use crate::config::RerankConfig;
use crate::errors::{with_timeout, AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Score for one passage, pointing back into the submitted list
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f64,
}

/// Trait for reranking services
#[async_trait]
pub trait RerankService: Send + Sync {
    /// Score `documents` against `query`, keeping at most `top_n`
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Cohere rerank API client
pub struct CohereReranker {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct CohereRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct CohereResponse {
    results: Vec<RerankScore>,
}

impl CohereReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::config("rerank.api_key is required"))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/rerank", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            timeout,
        })
    }

    async fn make_request(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
        let request = CohereRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        };

        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::upstream("rerank", format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream("rerank", format!("API error {}: {}", status, body)));
        }

        let result: CohereResponse = response.json().await.map_err(|e| {
            AppError::upstream("rerank", format!("Failed to parse response: {}", e))
        })?;

        Ok(result.results)
    }
}

#[async_trait]
impl RerankService for CohereReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
        with_timeout("rerank", self.timeout, self.make_request(query, documents, top_n)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Term-overlap reranker for local development and tests.
/// Scores a passage by the share of query terms it contains.
#[derive(Debug, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    fn terms(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '.' && c != '_')
            .map(|t| t.trim_matches('.').to_lowercase())
            .filter(|t| t.len() > 2)
            .collect()
    }
}

#[async_trait]
impl RerankService for LexicalReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
        let query_terms = Self::terms(query);
        if query_terms.is_empty() {
            return Err(AppError::upstream("rerank", "query has no terms"));
        }

        let mut scores: Vec<RerankScore> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_terms = Self::terms(doc);
                let shared = query_terms.intersection(&doc_terms).count();
                RerankScore {
                    index,
                    relevance_score: shared as f64 / query_terms.len() as f64,
                }
            })
            .collect();

        // Stable: equal scores keep submission order
        scores.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores.truncate(top_n);
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        "lexical-overlap"
    }
}

/// Reranker returning pinned scores regardless of input, for tests.
/// Scores are returned verbatim (after `top_n`), including indices the
/// caller may consider invalid.
#[derive(Debug, Default)]
pub struct FixedReranker {
    scores: Vec<RerankScore>,
    calls: std::sync::atomic::AtomicUsize,
    queries: std::sync::Mutex<Vec<String>>,
}

impl FixedReranker {
    pub fn new(scores: Vec<(usize, f64)>) -> Self {
        Self {
            scores: scores
                .into_iter()
                .map(|(index, relevance_score)| RerankScore { index, relevance_score })
                .collect(),
            ..Self::default()
        }
    }

    /// Number of times the service was called
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RerankService for FixedReranker {
    async fn rerank(&self, query: &str, _documents: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        Ok(self.scores.iter().copied().take(top_n).collect())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Create a reranking service based on configuration
pub fn create_reranker(config: &RerankConfig) -> Result<Arc<dyn RerankService>> {
    match config.provider.as_str() {
        "cohere" => Ok(Arc::new(CohereReranker::new(config)?)),
        "mock" => Ok(Arc::new(LexicalReranker)),
        other => Err(AppError::config(format!("unknown rerank provider '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lexical_orders_by_overlap() {
        let docs = vec![
            "Rigidbody physics settings".to_string(),
            "Move a GameObject with transform.Translate".to_string(),
            "GameObject lifecycle".to_string(),
        ];
        let scores = LexicalReranker
            .rerank("How do I move a GameObject?", &docs, 3)
            .await
            .unwrap();

        assert_eq!(scores[0].index, 1);
        assert_eq!(scores[1].index, 2);
        assert!(scores.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
    }

    #[tokio::test]
    async fn test_lexical_respects_top_n() {
        let docs: Vec<String> = (0..8).map(|i| format!("passage {}", i)).collect();
        let scores = LexicalReranker.rerank("passage", &docs, 3).await.unwrap();
        assert_eq!(scores.len(), 3);
        // All tie, so submission order is kept
        assert_eq!(scores.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"id":"x","results":[{"index":3,"relevance_score":0.91},{"index":0,"relevance_score":0.2}]}"#;
        let parsed: CohereResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results[0], RerankScore { index: 3, relevance_score: 0.91 });
    }

    #[tokio::test]
    async fn test_fixed_records_calls() {
        let reranker = FixedReranker::new(vec![(1, 0.9), (0, 0.4), (2, 0.1)]);
        let scores = reranker.rerank("q", &[], 2).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(reranker.calls(), 1);
        assert_eq!(reranker.queries(), vec!["q".to_string()]);
    }

    #[test]
    fn test_cohere_requires_key() {
        assert!(create_reranker(&RerankConfig::default()).is_err());
    }
}
