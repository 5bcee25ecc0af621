//! Completion model clients
//!
//! One trait covers both ways the pipeline talks to a language model:
//! a complete call (query expansion) and a streamed call (the answer).
//! The OpenAI-compatible client speaks the chat completions API; the
//! streamed variant decodes server-sent events into text fragments.

mod sse;

pub use sse::{decode_event_stream, SseDecoder, SseEvent};

use crate::config::LlmConfig;
use crate::errors::{with_timeout, AppError, Result};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lazily produced text fragments of one model response
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A text-completion model
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Return the whole response at once
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Return the response as fragments, in the order the model produces them.
    /// Dropping the stream aborts the underlying call.
    async fn stream(&self, prompt: &str) -> Result<TextStream>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completions client
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
    idle_timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIChatModel {
    /// Create a client for one model of the configured endpoint
    pub fn new(
        config: &LlmConfig,
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::config("llm.api_key is required"))?;

        // No whole-request timeout: streamed answers outlive any fixed bound.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: model.to_string(),
            temperature,
            max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };

        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::upstream(&self.model, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                &self.model,
                format!("API error {}: {}", status, body),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionModel for OpenAIChatModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        with_timeout(&self.model, self.timeout, async {
            let response = self.send(prompt, false).await?;

            let chat_response: ChatResponse = response.json().await.map_err(|e| {
                AppError::upstream(&self.model, format!("Failed to parse response: {}", e))
            })?;

            chat_response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| AppError::upstream(&self.model, "Empty response"))
        })
        .await
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let response = with_timeout(&self.model, self.timeout, self.send(prompt, true)).await?;

        tracing::debug!(model = %self.model, "Answer stream opened");

        Ok(decode_event_stream(
            response.bytes_stream(),
            self.model.clone(),
            self.idle_timeout,
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Model with pinned outputs, for local development and tests
pub struct ScriptedModel {
    name: String,
    completion: std::result::Result<String, String>,
    fragments: Vec<String>,
    stream_error_after: Option<usize>,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            completion: Ok(String::new()),
            fragments: Vec::new(),
            stream_error_after: None,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Response returned by `complete`
    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Ok(text.to_string());
        self
    }

    /// Make `complete` and `stream` fail before producing anything
    pub fn failing(mut self, message: &str) -> Self {
        self.completion = Err(message.to_string());
        self
    }

    /// Fragments produced by `stream`
    pub fn with_fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Fail the stream after emitting `count` fragments
    pub fn with_stream_error_after(mut self, count: usize) -> Self {
        self.stream_error_after = Some(count);
        self
    }

    /// Wait before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.record(prompt);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completion
            .clone()
            .map_err(|message| AppError::upstream(&self.name, message))
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        self.record(prompt);
        if let Err(message) = &self.completion {
            return Err(AppError::upstream(&self.name, message.clone()));
        }

        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if let Some(count) = self.stream_error_after {
            items.truncate(count);
            items.push(Err(AppError::upstream(&self.name, "stream interrupted")));
        }

        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// The two models the pipeline uses
#[derive(Clone)]
pub struct CompletionModels {
    pub expansion: Arc<dyn CompletionModel>,
    pub generation: Arc<dyn CompletionModel>,
}

/// Create the expansion and generation models based on configuration
pub fn create_completion_models(config: &LlmConfig) -> Result<CompletionModels> {
    match config.provider.as_str() {
        "openai" => Ok(CompletionModels {
            expansion: Arc::new(OpenAIChatModel::new(
                config,
                &config.expansion_model,
                config.expansion_temperature,
                None,
            )?),
            generation: Arc::new(OpenAIChatModel::new(
                config,
                &config.generation_model,
                config.generation_temperature,
                Some(config.max_tokens),
            )?),
        }),
        "mock" => {
            tracing::warn!("Using scripted completion models");
            Ok(CompletionModels {
                expansion: Arc::new(
                    ScriptedModel::new("mock-expansion")
                        .with_completion("mock query\nmock keywords\nhow to mock"),
                ),
                generation: Arc::new(
                    ScriptedModel::new("mock-generation")
                        .with_fragments(&["This is ", "a mock ", "answer."]),
                ),
            })
        }
        other => Err(AppError::config(format!("unknown llm provider '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_stream_in_order() {
        let model = ScriptedModel::new("m").with_fragments(&["a", "b", "c"]);
        let stream = model.stream("prompt").await.unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["a", "b", "c"]);
        assert_eq!(model.prompts(), vec!["prompt".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_stream_error_after() {
        let model = ScriptedModel::new("m")
            .with_fragments(&["a", "b", "c"])
            .with_stream_error_after(1);
        let items: Vec<Result<String>> = model.stream("p").await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let model = ScriptedModel::new("m").failing("rate limited");
        let err = model.complete("p").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { .. }));
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LlmConfig::default();
        assert!(create_completion_models(&config).is_err());
    }

    #[test]
    fn test_endpoint_normalised() {
        let config = LlmConfig {
            api_key: Some("sk-test".into()),
            api_base: "http://localhost:8000/v1/".into(),
            ..LlmConfig::default()
        };
        let model = OpenAIChatModel::new(&config, "gpt-4o-mini", 0.0, None).unwrap();
        assert_eq!(model.endpoint, "http://localhost:8000/v1/chat/completions");
        assert_eq!(model.model_name(), "gpt-4o-mini");
    }
}
