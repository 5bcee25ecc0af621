//! Reranking of the candidate set against the original question

use crate::errors::{attribute, rerank};
use crate::model::{CandidateSet, Question, RankedResult};
use docsage_common::errors::Result;
use docsage_common::metrics;
use docsage_common::rerank::RerankService;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct Reranker {
    service: Arc<dyn RerankService>,
    top_k: usize,
}

impl Reranker {
    pub fn new(service: Arc<dyn RerankService>, top_k: usize) -> Self {
        Self { service, top_k }
    }

    /// Score candidates against the question and keep the best `top_k`.
    ///
    /// Results are ordered by descending score with ties in the service's
    /// order. An empty candidate set returns immediately without calling
    /// the service.
    #[instrument(skip_all, fields(candidates = candidates.len(), top_k = self.top_k))]
    pub async fn rerank(&self, candidates: CandidateSet, question: &Question) -> Result<Vec<RankedResult>> {
        if candidates.is_empty() {
            debug!("No candidates to rerank");
            metrics::record_reranked(0);
            return Ok(Vec::new());
        }

        let hits = candidates.into_hits();
        let documents: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();

        let mut scores = self
            .service
            .rerank(question.as_str(), &documents, self.top_k)
            .await
            .map_err(|e| attribute(e, rerank))?;

        let mut seen = HashSet::new();
        scores.retain(|s| {
            if s.index >= hits.len() {
                warn!(index = s.index, candidates = hits.len(), "Reranker returned out-of-range index");
                return false;
            }
            if !seen.insert(s.index) {
                warn!(index = s.index, "Reranker returned duplicate index");
                return false;
            }
            true
        });

        scores.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores.truncate(self.top_k);

        let ranked: Vec<RankedResult> = scores
            .into_iter()
            .enumerate()
            .map(|(rank, score)| RankedResult {
                hit: hits[score.index].clone(),
                relevance_score: score.relevance_score,
                rank,
            })
            .collect();

        metrics::record_reranked(ranked.len());
        Ok(ranked)
    }
}
