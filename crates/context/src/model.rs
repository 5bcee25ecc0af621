//! Request-scoped data carried through the pipeline

use docsage_common::errors::{AppError, Result};
use docsage_common::search::SearchHit;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// The user's question. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Question(String);

impl Question {
    /// Trim the text and reject empty questions
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation {
                message: "question must not be empty".to_string(),
                field: Some("question".to_string()),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an expanded query is meant to capture, by its position in the
/// model output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRole {
    /// The question restated exactly
    Restatement,
    /// Essential keywords only
    Keywords,
    /// Phrased as a "how to" question
    HowTo,
}

impl QueryRole {
    pub fn from_position(position: usize) -> Option<Self> {
        match position {
            0 => Some(QueryRole::Restatement),
            1 => Some(QueryRole::Keywords),
            2 => Some(QueryRole::HowTo),
            _ => None,
        }
    }
}

/// A search string derived from the question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedQuery {
    pub text: String,
    pub role: QueryRole,
}

/// Hits from every expanded query, unique by id, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    hits: Vec<SearchHit>,
    seen: HashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hit unless its id is already present. Returns whether it was added.
    pub fn insert(&mut self, hit: SearchHit) -> bool {
        if !self.seen.insert(hit.id.clone()) {
            return false;
        }
        self.hits.push(hit);
        true
    }

    pub fn get(&self, id: &str) -> Option<&SearchHit> {
        if !self.seen.contains(id) {
            return None;
        }
        self.hits.iter().find(|h| h.id == id)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchHit> {
        self.hits.iter()
    }

    pub fn into_hits(self) -> Vec<SearchHit> {
        self.hits
    }
}

/// A candidate scored against the original question.
/// `rank` is 0-based and scores never increase with rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub hit: SearchHit,
    pub relevance_score: f64,
    pub rank: usize,
}

/// Grounding text handed to the answer prompt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    text: String,
    passages: usize,
}

impl Context {
    pub fn new(text: String, passages: usize) -> Self {
        Self { text, passages }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.passages == 0
    }

    /// Number of passages included (a truncated one counts)
    pub fn passage_count(&self) -> usize {
        self.passages
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Attribution for one passage the answer was grounded on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub url: String,
    pub doc_type: String,
    pub rank: usize,
    pub relevance_score: f64,
}

impl From<&RankedResult> for Source {
    fn from(result: &RankedResult) -> Self {
        Self {
            id: result.hit.id.clone(),
            title: result.hit.metadata.title.clone(),
            url: result.hit.metadata.url.clone(),
            doc_type: result.hit.metadata.doc_type.clone(),
            rank: result.rank,
            relevance_score: result.relevance_score,
        }
    }
}
