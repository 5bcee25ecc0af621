//! Stage error classification

use docsage_common::errors::AppError;

/// Attribute a collaborator failure to the stage that made the call.
/// Timeouts, configuration and validation errors keep their own kind.
pub(crate) fn attribute(err: AppError, wrap: fn(String) -> AppError) -> AppError {
    match err {
        e @ (AppError::UpstreamTimeout { .. }
        | AppError::Configuration { .. }
        | AppError::Validation { .. }) => e,
        other => wrap(other.to_string()),
    }
}

pub(crate) fn expansion(message: String) -> AppError {
    AppError::ExpansionError { message }
}

pub(crate) fn embedding(message: String) -> AppError {
    AppError::EmbeddingError { message }
}

pub(crate) fn search(message: String) -> AppError {
    AppError::SearchError { message }
}

pub(crate) fn rerank(message: String) -> AppError {
    AppError::RerankError { message }
}

pub(crate) fn generation(message: String) -> AppError {
    AppError::GenerationError { message }
}
