//! Hybrid search through the store's SQL function

use super::{check_function_name, HitMetadata, HybridSearchBackend, HybridSearchParams, SearchHit};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, Statement};

/// Calls `function(query_text, query_embedding, match_count,
/// full_text_weight, semantic_weight, rrf_k)` on the documentation store
pub struct PostgresHybridSearch {
    db: DbPool,
    sql: String,
}

impl PostgresHybridSearch {
    pub fn new(db: DbPool, function: &str) -> Result<Self> {
        check_function_name(function)?;

        let sql = format!(
            r#"
            SELECT
                id::text AS id,
                content,
                metadata,
                score::float8 AS score
            FROM {function}($1, $2::vector, $3, $4, $5, $6)
            "#,
            function = function
        );

        Ok(Self { db, sql })
    }
}

/// pgvector text form: `[0.1,0.2,...]`
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Malformed metadata fails the search, as it does over RPC
fn parse_metadata(id: &str, metadata: serde_json::Value) -> Result<HitMetadata> {
    serde_json::from_value(metadata).map_err(|e| {
        AppError::upstream("search", format!("Malformed metadata for hit {}: {}", id, e))
    })
}

#[async_trait]
impl HybridSearchBackend for PostgresHybridSearch {
    async fn hybrid_search(&self, params: &HybridSearchParams) -> Result<Vec<SearchHit>> {
        let values: Vec<sea_orm::Value> = vec![
            params.query_text.clone().into(),
            vector_literal(&params.query_embedding).into(),
            (params.match_count as i32).into(),
            params.full_text_weight.into(),
            params.semantic_weight.into(),
            (params.rrf_k as i32).into(),
        ];

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &self.sql, values);

        let rows = self.db
            .conn()
            .query_all(stmt)
            .await
            .map_err(|e| AppError::upstream("search", format!("Query failed: {}", e)))?;

        rows.into_iter()
            .map(|row| -> Result<SearchHit> {
                let id = row.try_get_by_index::<String>(0)?;
                let metadata = parse_metadata(&id, row.try_get_by_index::<serde_json::Value>(2)?)?;
                Ok(SearchHit {
                    id,
                    content: row.try_get_by_index::<String>(1)?,
                    metadata,
                    score: row.try_get_by_index::<f64>(3)?,
                })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.25]), "[0.5,-1,2.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = parse_metadata(
            "17",
            serde_json::json!({"source_url": "https://docs.unity3d.com/Manual/Rigidbody.html", "title": "Rigidbody"}),
        )
        .unwrap();
        assert_eq!(metadata.url, "https://docs.unity3d.com/Manual/Rigidbody.html");
        assert_eq!(metadata.title, "Rigidbody");

        assert_eq!(parse_metadata("18", serde_json::json!({})).unwrap(), HitMetadata::default());
    }

    #[test]
    fn test_malformed_metadata_fails_search() {
        let err = parse_metadata("42", serde_json::json!({"title": ["not", "a", "string"]})).unwrap_err();
        assert!(matches!(err, AppError::Upstream { ref service, .. } if service == "search"));
        assert!(err.to_string().contains("hit 42"));
    }
}
