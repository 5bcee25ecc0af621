//! Server-sent event decoding for streamed chat completions

use super::TextStream;
use crate::errors::{AppError, Result};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

/// One decoded line of the event stream
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Text produced by the model
    Fragment(String),
    /// The `[DONE]` sentinel
    Done,
    /// A data line that could not be understood
    Malformed(String),
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental line decoder. Bytes are buffered until a full line is
/// available, so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body and return the events it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest)).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    // Comments, event names and ids carry no text
    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(SseEvent::Fragment(text))
            }
        }
        Err(e) => Some(SseEvent::Malformed(e.to_string())),
    }
}

struct DecodeState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
    service: String,
    idle_timeout: Duration,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                break;
            }
            match event {
                SseEvent::Fragment(text) => self.pending.push_back(Ok(text)),
                SseEvent::Done => self.finished = true,
                SseEvent::Malformed(message) => {
                    self.pending.push_back(Err(AppError::upstream(
                        &self.service,
                        format!("Malformed stream event: {}", message),
                    )));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turn a streamed response body into text fragments.
///
/// Every wait for the next chunk is bounded by `idle_timeout`. The stream
/// ends at `[DONE]`, at the end of the body, or after the first error.
pub fn decode_event_stream<S, B, E>(body: S, service: String, idle_timeout: Duration) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
        service,
        idle_timeout,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match tokio::time::timeout(state.idle_timeout, state.body.next()).await {
                Err(_) => {
                    state.finished = true;
                    let err = AppError::UpstreamTimeout {
                        service: state.service.clone(),
                        timeout_ms: state.idle_timeout.as_millis() as u64,
                    };
                    return Some((Err(err), state));
                }
                Ok(None) => {
                    let rest = state.decoder.finish();
                    state.absorb(rest);
                    state.finished = true;
                }
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    let err = AppError::upstream(&state.service, format!("Stream broken: {}", e));
                    return Some((Err(err), state));
                }
                Ok(Some(Ok(chunk))) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.absorb(events);
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        let line = data("Hello");
        let (a, b) = line.split_at(10);

        assert!(decoder.push(a.as_bytes()).is_empty());
        assert_eq!(decoder.push(b.as_bytes()), vec![SseEvent::Fragment("Hello".into())]);
    }

    #[test]
    fn test_decoder_handles_split_utf8() {
        let mut decoder = SseDecoder::new();
        let line = data("é");
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![SseEvent::Fragment("é".into())]);
    }

    #[test]
    fn test_decoder_skips_role_and_comments() {
        let mut decoder = SseDecoder::new();
        let body = ": keep-alive\n\
                    data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                    data: [DONE]\n";
        assert_eq!(decoder.push(body.as_bytes()), vec![SseEvent::Done]);
    }

    #[tokio::test]
    async fn test_stream_stops_at_done() {
        let chunks = vec![
            Ok::<_, std::io::Error>(data("Use ").into_bytes()),
            Ok(data("transform.Translate").into_bytes()),
            Ok(b"data: [DONE]\n\n".to_vec()),
            Ok(data("ignored").into_bytes()),
        ];
        let stream = decode_event_stream(
            futures::stream::iter(chunks),
            "gpt".into(),
            Duration::from_secs(1),
        );
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Use ", "transform.Translate"]);
    }

    #[tokio::test]
    async fn test_stream_reports_malformed_event() {
        let chunks = vec![
            Ok::<_, std::io::Error>(data("partial").into_bytes()),
            Ok(b"data: {not json}\n".to_vec()),
        ];
        let items: Vec<Result<String>> = decode_event_stream(
            futures::stream::iter(chunks),
            "gpt".into(),
            Duration::from_secs(1),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(items[1], Err(AppError::Upstream { .. })));
    }

    #[tokio::test]
    async fn test_stream_idle_timeout() {
        let body = futures::stream::pending::<std::result::Result<Vec<u8>, std::io::Error>>();
        let items: Vec<Result<String>> =
            decode_event_stream(body, "gpt".into(), Duration::from_millis(20))
                .collect()
                .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AppError::UpstreamTimeout { .. })));
    }
}
