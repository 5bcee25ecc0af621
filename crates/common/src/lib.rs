//! DocSage Common Library
//!
//! Shared code for the DocSage services including:
//! - Configuration management
//! - Error types and handling
//! - Metrics and observability
//! - Clients for the remote collaborators: embedding service,
//!   completion models, reranking service, hybrid search backends
//! - Prompt templates

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod prompts;
pub mod rerank;
pub mod search;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{CompletionModel, TextStream};
pub use rerank::RerankService;
pub use search::{HybridSearchBackend, SearchHit};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
