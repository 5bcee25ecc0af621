//! Chat handlers
//!
//! `/chat` streams the answer as server-sent events:
//! `sources` (once), `token` (per fragment), then `done`, or `error` if
//! generation fails midway. Anything that fails before the first event is
//! a plain JSON error response.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use docsage_common::errors::{with_timeout, AppError, Result};
use docsage_context::{Answer, CompletedAnswer, Question};

/// Chat request, in the shape chat UIs send
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 100), nested)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ChatMessage {
    #[validate(length(min = 1, max = 32))]
    pub role: String,

    #[validate(length(max = 8000))]
    pub content: String,
}

impl ChatRequest {
    /// The latest user message is the question
    pub fn question(&self) -> Result<Question> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: None,
        })?;

        let latest = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or_else(|| AppError::MissingField {
                field: "messages[role=user]".to_string(),
            })?;

        Question::new(latest.content.as_str())
    }
}

#[derive(Serialize)]
struct TokenPayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct DonePayload {
    request_id: Uuid,
    fragments: u64,
}

fn json_event<T: Serialize>(name: &'static str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, event = name, "Failed to encode event");
            Event::default().event("error").data("event encoding failed")
        })
}

fn error_event(error: &AppError, request_id: Uuid) -> Event {
    let mut body = error.to_response_body();
    body.error.request_id = Some(request_id.to_string());
    json_event("error", &body)
}

/// Token events followed by exactly one `done` or `error` event
fn answer_events(answer: Answer, request_id: Uuid) -> impl Stream<Item = Event> {
    stream::unfold(Some(answer), move |state| async move {
        let mut answer = state?;
        match answer.next().await {
            Some(Ok(fragment)) => {
                let event = json_event("token", &TokenPayload { text: &fragment });
                Some((event, Some(answer)))
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, %request_id, "Answer stream failed after start");
                Some((error_event(&e, request_id), None))
            }
            None => {
                let done = DonePayload {
                    request_id,
                    fragments: answer.fragments(),
                };
                Some((json_event("done", &done), None))
            }
        }
    })
}

/// Stream a grounded answer
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let question = request.question()?;

    let prepared = state.orchestrator.prepare(question).await?;
    let request_id = prepared.request_id;

    tracing::info!(
        %request_id,
        queries = prepared.queries.len(),
        sources = prepared.sources.len(),
        "Streaming answer"
    );

    let events = stream::once(async move { json_event("sources", &prepared.sources) })
        .chain(answer_events(prepared.answer, request_id))
        .map(Ok);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Answer without streaming
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<CompletedAnswer>> {
    let question = request.question()?;
    let limit = state.config.request_timeout();

    let completed = with_timeout("pipeline", limit, state.orchestrator.answer(question)).await?;

    tracing::info!(
        request_id = %completed.request_id,
        sources = completed.sources.len(),
        latency_ms = completed.processing_time_ms,
        "Answer completed"
    );

    Ok(Json(completed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: &[(&str, &str)]) -> ChatRequest {
        ChatRequest {
            messages: messages
                .iter()
                .map(|(role, content)| ChatMessage {
                    role: role.to_string(),
                    content: content.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_latest_user_message_is_question() {
        let req = request(&[
            ("user", "What is a prefab?"),
            ("assistant", "A reusable GameObject."),
            ("user", "  How do I spawn one?  "),
        ]);
        assert_eq!(req.question().unwrap().as_str(), "How do I spawn one?");
    }

    #[test]
    fn test_no_user_message() {
        let err = request(&[("assistant", "hello")]).question().unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
    }

    #[test]
    fn test_empty_messages_rejected() {
        let err = request(&[]).question().unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_blank_question_rejected() {
        let err = request(&[("user", "   ")]).question().unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
