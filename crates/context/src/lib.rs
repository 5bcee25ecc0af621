//! DocSage Context Engine
//!
//! Turns one question into a grounded, streamed answer:
//! - Query expansion into several search phrasings
//! - Concurrent hybrid retrieval with index-stable fan-in
//! - Deduplication and reranking against the original question
//! - Context assembly and answer streaming
//!
//! The [`Orchestrator`] sequences the stages for one request.

mod errors;

pub mod aggregator;
pub mod assembler;
pub mod expander;
pub mod model;
pub mod orchestrator;
pub mod reranker;
pub mod retrieval;
pub mod streamer;

pub use aggregator::ResultAggregator;
pub use assembler::ContextAssembler;
pub use expander::QueryExpander;
pub use model::{CandidateSet, Context, ExpandedQuery, Question, QueryRole, RankedResult, Source};
pub use orchestrator::{Orchestrator, PipelineStage, PreparedAnswer, CompletedAnswer};
pub use reranker::Reranker;
pub use retrieval::HybridSearchClient;
pub use streamer::{Answer, AnswerStreamer};
