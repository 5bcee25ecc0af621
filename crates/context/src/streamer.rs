//! Grounded answer generation
//!
//! The answer prompt constrains the model to the assembled context, asks
//! it to use the abstain phrase when the context lacks the answer, and to
//! prefer code examples found in the context. Fragments are forwarded as
//! the model produces them.

use crate::errors::{attribute, generation};
use crate::model::{Context, Question};
use crate::orchestrator::PipelineStage;
use docsage_common::errors::Result;
use docsage_common::llm::{CompletionModel, TextStream};
use docsage_common::metrics;
use docsage_common::prompts::PromptSet;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tracing::{debug, info, instrument, warn, Span};

pub struct AnswerStreamer {
    model: Arc<dyn CompletionModel>,
    prompts: Arc<PromptSet>,
}

impl AnswerStreamer {
    pub fn new(model: Arc<dyn CompletionModel>, prompts: Arc<PromptSet>) -> Self {
        Self { model, prompts }
    }

    /// Start generating an answer.
    ///
    /// An empty context answers with the abstain phrase without calling
    /// the model.
    #[instrument(skip_all, fields(model = self.model.model_name(), passages = context.passage_count()))]
    pub async fn generate(&self, question: &Question, context: &Context) -> Result<Answer> {
        if context.is_empty() {
            debug!("Empty context, abstaining");
            let abstain = self.prompts.abstain_phrase.clone();
            return Ok(Answer::new(Box::pin(futures::stream::once(async move { Ok(abstain) }))));
        }

        let prompt = self.prompts.render_answer(question.as_str(), context.as_str());
        let stream = self
            .model
            .stream(&prompt)
            .await
            .map_err(|e| attribute(e, generation))?;

        Ok(Answer::new(stream))
    }
}

/// A single-use stream of answer fragments.
///
/// Errors end the stream. Dropping the answer drops the model call.
pub struct Answer {
    inner: TextStream,
    fragments: u64,
    finished: bool,
    span: Span,
}

impl Answer {
    fn new(inner: TextStream) -> Self {
        Self {
            inner,
            fragments: 0,
            finished: false,
            span: Span::none(),
        }
    }

    /// Report stream completion inside `span`
    pub(crate) fn in_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fragments yielded so far
    pub fn fragments(&self) -> u64 {
        self.fragments
    }

    /// Drain the stream into one string
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    fn finish(&mut self, failed: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        metrics::record_fragments(self.fragments);

        let _entered = self.span.clone().entered();
        if failed {
            metrics::record_pipeline_failure(PipelineStage::Streaming.as_str());
            warn!(
                from = %PipelineStage::Streaming,
                stage = %PipelineStage::Failed,
                fragments = self.fragments,
                "Answer stream failed"
            );
        } else {
            info!(
                from = %PipelineStage::Streaming,
                stage = %PipelineStage::Completed,
                fragments = self.fragments,
                "Answer stream completed"
            );
        }
    }
}

impl Stream for Answer {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                self.fragments += 1;
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finish(true);
                Poll::Ready(Some(Err(attribute(e, generation))))
            }
            Poll::Ready(None) => {
                self.finish(false);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Answer {
    fn drop(&mut self) {
        if !self.finished {
            let _entered = self.span.clone().entered();
            debug!(fragments = self.fragments, "Answer stream dropped before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsage_common::errors::AppError;
    use docsage_common::llm::ScriptedModel;
    use docsage_common::prompts::DEFAULT_ABSTAIN_PHRASE;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sets its flag when the stream owning it is dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn streamer(model: Arc<ScriptedModel>) -> AnswerStreamer {
        AnswerStreamer::new(model, Arc::new(PromptSet::default()))
    }

    #[tokio::test]
    async fn test_empty_context_abstains_without_model_call() {
        let model = Arc::new(ScriptedModel::new("gen").with_fragments(&["never"]));
        let answer = streamer(model.clone())
            .generate(&Question::new("q").unwrap(), &Context::default())
            .await
            .unwrap();

        let fragments: Vec<Result<String>> = answer.collect().await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), DEFAULT_ABSTAIN_PHRASE);
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_fragments_in_order_and_prompt_grounded() {
        let model = Arc::new(ScriptedModel::new("gen").with_fragments(&["Use ", "transform.Translate", "."]));
        let context = Context::new("transform.Translate moves the transform".into(), 1);

        let answer = streamer(model.clone())
            .generate(&Question::new("How do I move?").unwrap(), &context)
            .await
            .unwrap();

        assert_eq!(answer.collect_text().await.unwrap(), "Use transform.Translate.");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("transform.Translate moves the transform"));
        assert!(prompt.contains(DEFAULT_ABSTAIN_PHRASE));
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_stream() {
        let model = Arc::new(
            ScriptedModel::new("gen")
                .with_fragments(&["a", "b", "c"])
                .with_stream_error_after(2),
        );
        let mut answer = streamer(model)
            .generate(&Question::new("q").unwrap(), &Context::new("ctx".into(), 1))
            .await
            .unwrap();

        assert_eq!(answer.next().await.unwrap().unwrap(), "a");
        assert_eq!(answer.next().await.unwrap().unwrap(), "b");
        let err = answer.next().await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::GenerationError { .. }));
        assert!(answer.next().await.is_none());
        assert_eq!(answer.fragments(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_generation_error() {
        let model = Arc::new(ScriptedModel::new("gen").failing("500"));
        let result = streamer(model)
            .generate(&Question::new("q").unwrap(), &Context::new("ctx".into(), 1))
            .await;
        assert!(matches!(result, Err(AppError::GenerationError { .. })));
    }

    #[tokio::test]
    async fn test_dropping_answer_drops_model_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        // Never ends on its own
        let upstream = futures::stream::unfold((DropFlag(dropped.clone()), 0u32), |(flag, n)| async move {
            Some((Ok::<_, AppError>(format!("fragment {}", n)), (flag, n + 1)))
        });
        let mut answer = Answer::new(Box::pin(upstream));

        assert_eq!(answer.next().await.unwrap().unwrap(), "fragment 0");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(answer);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
