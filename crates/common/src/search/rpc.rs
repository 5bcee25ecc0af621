//! Hybrid search through an HTTP RPC gateway in front of the store

use super::{check_function_name, HybridSearchBackend, HybridSearchParams, SearchHit};
use crate::config::SearchConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// POSTs the function arguments as named JSON fields to
/// `{rpc_url}/rest/v1/rpc/{function}`
pub struct RpcHybridSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RpcHybridSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        check_function_name(&config.function)?;

        let base = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| AppError::config("search.rpc_url is required"))?;
        let api_key = config
            .rpc_api_key
            .clone()
            .ok_or_else(|| AppError::config("search.rpc_api_key is required"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/rpc/{}", base.trim_end_matches('/'), config.function),
            api_key,
        })
    }
}

#[async_trait]
impl HybridSearchBackend for RpcHybridSearch {
    async fn hybrid_search(&self, params: &HybridSearchParams) -> Result<Vec<SearchHit>> {
        let response = self.client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(params)
            .send()
            .await
            .map_err(|e| AppError::upstream("search", format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream("search", format!("RPC error {}: {}", status, body)));
        }

        response.json::<Vec<SearchHit>>().await.map_err(|e| {
            AppError::upstream("search", format!("Failed to parse response: {}", e))
        })
    }

    fn name(&self) -> &str {
        "rpc"
    }
}
