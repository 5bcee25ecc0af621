//! Query expansion

use crate::errors::{attribute, expansion};
use crate::model::{ExpandedQuery, QueryRole, Question};
use docsage_common::errors::{AppError, Result};
use docsage_common::llm::CompletionModel;
use docsage_common::metrics;
use docsage_common::prompts::PromptSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Upper bound on queries taken from one model response
pub const MAX_EXPANDED_QUERIES: usize = 3;

/// Rephrases a question into several search queries using a completion model
pub struct QueryExpander {
    model: Arc<dyn CompletionModel>,
    prompts: Arc<PromptSet>,
}

impl QueryExpander {
    pub fn new(model: Arc<dyn CompletionModel>, prompts: Arc<PromptSet>) -> Self {
        Self { model, prompts }
    }

    /// Produce between 1 and 3 queries. A model failure is fatal; there is
    /// no fallback to the unexpanded question.
    #[instrument(skip(self, question), fields(model = self.model.model_name()))]
    pub async fn expand(&self, question: &Question) -> Result<Vec<ExpandedQuery>> {
        let prompt = self.prompts.render_expansion(question.as_str());

        let output = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| attribute(e, expansion))?;

        let queries = parse_expansion(&output)?;
        if queries.len() < MAX_EXPANDED_QUERIES {
            warn!(count = queries.len(), "Expansion returned fewer queries than requested");
        }
        debug!(queries = ?queries.iter().map(|q| q.text.as_str()).collect::<Vec<_>>(), "Question expanded");

        metrics::record_expansion(queries.len());
        Ok(queries)
    }
}

/// Split model output into queries: one per non-empty line, trimmed, at most
/// [`MAX_EXPANDED_QUERIES`].
pub fn parse_expansion(output: &str) -> Result<Vec<ExpandedQuery>> {
    let queries: Vec<ExpandedQuery> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(MAX_EXPANDED_QUERIES)
        .enumerate()
        .filter_map(|(position, text)| {
            QueryRole::from_position(position).map(|role| ExpandedQuery {
                text: text.to_string(),
                role,
            })
        })
        .collect();

    if queries.is_empty() {
        return Err(AppError::ExpansionError {
            message: "model returned no usable queries".to_string(),
        });
    }

    Ok(queries)
}
