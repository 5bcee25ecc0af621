//! Candidate aggregation across expanded queries

use crate::model::CandidateSet;
use docsage_common::metrics;
use docsage_common::search::SearchHit;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Flatten per-query results in query order then hit order, keeping the
    /// first payload seen for each id. Later duplicates are discarded as-is.
    pub fn aggregate(&self, per_query: Vec<Vec<SearchHit>>) -> CandidateSet {
        let mut candidates = CandidateSet::new();
        let mut total = 0usize;

        for hit in per_query.into_iter().flatten() {
            total += 1;
            candidates.insert(hit);
        }

        debug!(
            total,
            unique = candidates.len(),
            "Aggregated search results"
        );
        metrics::record_candidates(candidates.len());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::hit;

    #[test]
    fn test_first_occurrence_wins() {
        let results = vec![
            vec![hit("a", "from q1"), hit("b", "from q1")],
            vec![hit("b", "from q2"), hit("c", "from q2")],
            vec![hit("a", "from q3")],
        ];

        let candidates = ResultAggregator.aggregate(results);

        let ids: Vec<&str> = candidates.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(candidates.get("a").unwrap().content, "from q1");
        assert_eq!(candidates.get("b").unwrap().content, "from q1");
    }

    #[test]
    fn test_empty_input() {
        assert!(ResultAggregator.aggregate(Vec::new()).is_empty());
        assert!(ResultAggregator.aggregate(vec![Vec::new(), Vec::new()]).is_empty());
    }
}
