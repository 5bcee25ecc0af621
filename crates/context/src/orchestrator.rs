//! Pipeline orchestration
//!
//! One request walks the stages
//! `Received → Expanding → Retrieving → Aggregating → Reranking →
//! Assembling → Generating → Streaming → Completed`, or ends in `Failed`
//! from any of them. Every transition is logged with the request id and
//! each stage's latency is recorded.
//!
//! There is no retry and no partial degradation: the first error fails
//! the request. The only exception is the opt-in search failure isolation
//! of [`HybridSearchClient`].

use crate::aggregator::ResultAggregator;
use crate::assembler::ContextAssembler;
use crate::expander::QueryExpander;
use crate::model::{ExpandedQuery, Question, Source};
use crate::reranker::Reranker;
use crate::retrieval::HybridSearchClient;
use crate::streamer::{Answer, AnswerStreamer};
use docsage_common::config::AppConfig;
use docsage_common::db::DbPool;
use docsage_common::embeddings::create_embedder;
use docsage_common::errors::Result;
use docsage_common::llm::create_completion_models;
use docsage_common::metrics;
use docsage_common::prompts::PromptSet;
use docsage_common::rerank::create_reranker;
use docsage_common::search::create_search_backend;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Expanding,
    Retrieving,
    Aggregating,
    Reranking,
    Assembling,
    Generating,
    Streaming,
    Completed,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Expanding => "expanding",
            PipelineStage::Retrieving => "retrieving",
            PipelineStage::Aggregating => "aggregating",
            PipelineStage::Reranking => "reranking",
            PipelineStage::Assembling => "assembling",
            PipelineStage::Generating => "generating",
            PipelineStage::Streaming => "streaming",
            PipelineStage::Completed => "completed",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Completed | PipelineStage::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current stage of one request
struct StageTracker {
    stage: PipelineStage,
    entered_at: Instant,
}

impl StageTracker {
    fn new() -> Self {
        info!(stage = %PipelineStage::Received, "Request received");
        Self {
            stage: PipelineStage::Received,
            entered_at: Instant::now(),
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        let elapsed = self.entered_at.elapsed();
        if self.stage != PipelineStage::Received {
            metrics::record_stage(self.stage.as_str(), elapsed.as_secs_f64());
        }
        info!(
            from = %self.stage,
            stage = %next,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage transition"
        );
        self.stage = next;
        self.entered_at = Instant::now();
    }

    /// Move to `Failed` if the stage returned an error
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            metrics::record_pipeline_failure(self.stage.as_str());
            warn!(
                from = %self.stage,
                stage = %PipelineStage::Failed,
                error = %e,
                code = ?e.code(),
                "Pipeline failed"
            );
            self.stage = PipelineStage::Failed;
        }
        result
    }
}

/// A request that has reached the streaming stage
pub struct PreparedAnswer {
    pub request_id: Uuid,
    pub queries: Vec<ExpandedQuery>,
    pub sources: Vec<Source>,
    /// Consume to stream the answer. Dropping it aborts generation.
    pub answer: Answer,
}

/// A fully generated answer
#[derive(Debug, Clone, Serialize)]
pub struct CompletedAnswer {
    pub request_id: Uuid,
    pub answer: String,
    pub sources: Vec<Source>,
    pub queries: Vec<String>,
    pub processing_time_ms: u64,
}

/// Sequences the pipeline stages. Shared across requests; holds no
/// per-request state.
pub struct Orchestrator {
    expander: QueryExpander,
    search: HybridSearchClient,
    aggregator: ResultAggregator,
    reranker: Reranker,
    assembler: ContextAssembler,
    streamer: AnswerStreamer,
}

impl Orchestrator {
    pub fn new(
        expander: QueryExpander,
        search: HybridSearchClient,
        reranker: Reranker,
        assembler: ContextAssembler,
        streamer: AnswerStreamer,
    ) -> Self {
        Self {
            expander,
            search,
            aggregator: ResultAggregator,
            reranker,
            assembler,
            streamer,
        }
    }

    /// Build every collaborator from configuration
    pub fn from_config(config: &AppConfig, db: Option<DbPool>) -> Result<Self> {
        let prompts = Arc::new(PromptSet::from_config(&config.prompts)?);
        let models = create_completion_models(&config.llm)?;
        let embedder = create_embedder(&config.embedding)?;
        let backend = create_search_backend(config, db)?;
        let rerank_service = create_reranker(&config.rerank)?;

        info!(
            expansion_model = models.expansion.model_name(),
            generation_model = models.generation.model_name(),
            embedding_model = embedder.model_name(),
            search_backend = backend.name(),
            rerank_model = rerank_service.model_name(),
            top_k = config.rerank.top_k,
            "Pipeline configured"
        );

        Ok(Self::new(
            QueryExpander::new(models.expansion, prompts.clone()),
            HybridSearchClient::new(
                embedder,
                backend,
                &config.search,
                config.embedding.call_timeout(),
            ),
            Reranker::new(rerank_service, config.rerank.top_k),
            ContextAssembler::new(&config.context),
            AnswerStreamer::new(models.generation, prompts),
        ))
    }

    /// Run every stage up to the start of generation.
    ///
    /// An error here means nothing has been sent to the caller yet.
    pub async fn prepare(&self, question: Question) -> Result<PreparedAnswer> {
        let request_id = Uuid::new_v4();
        let span = info_span!("pipeline", request_id = %request_id);

        self.run(request_id, question, span.clone())
            .instrument(span)
            .await
    }

    async fn run(&self, request_id: Uuid, question: Question, span: Span) -> Result<PreparedAnswer> {
        let mut tracker = StageTracker::new();

        tracker.advance(PipelineStage::Expanding);
        let queries = tracker.check(self.expander.expand(&question).await)?;

        tracker.advance(PipelineStage::Retrieving);
        let per_query = tracker.check(self.search.search_all(&queries).await)?;

        tracker.advance(PipelineStage::Aggregating);
        let candidates = self.aggregator.aggregate(per_query);

        tracker.advance(PipelineStage::Reranking);
        let ranked = tracker.check(self.reranker.rerank(candidates, &question).await)?;

        tracker.advance(PipelineStage::Assembling);
        let context = self.assembler.assemble(&ranked);

        tracker.advance(PipelineStage::Generating);
        let answer = tracker.check(self.streamer.generate(&question, &context).await)?;

        tracker.advance(PipelineStage::Streaming);

        Ok(PreparedAnswer {
            request_id,
            queries,
            sources: ranked.iter().map(Source::from).collect(),
            answer: answer.in_span(span),
        })
    }

    /// Run the whole pipeline and collect the answer
    pub async fn answer(&self, question: Question) -> Result<CompletedAnswer> {
        let started = Instant::now();
        let prepared = self.prepare(question).await?;
        let answer = prepared.answer.collect_text().await?;

        Ok(CompletedAnswer {
            request_id: prepared.request_id,
            answer,
            sources: prepared.sources,
            queries: prepared.queries.into_iter().map(|q| q.text).collect(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::hit;
    use docsage_common::config::{ContextConfig, SearchConfig};
    use docsage_common::embeddings::MockEmbedder;
    use docsage_common::errors::AppError;
    use docsage_common::llm::ScriptedModel;
    use docsage_common::prompts::DEFAULT_ABSTAIN_PHRASE;
    use docsage_common::rerank::LexicalReranker;
    use docsage_common::search::{SearchHit, StaticSearchBackend};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_test::assert_ok;

    const QUESTION: &str = "How do I move a GameObject in Unity?";
    const QUERIES: [&str; 3] = [
        "How do I move a GameObject in Unity?",
        "move GameObject transform position",
        "how to move objects in Unity",
    ];

    fn filler(prefix: &str, count: usize) -> Vec<SearchHit> {
        (0..count)
            .map(|i| hit(&format!("{}-{}", prefix, i), &format!("Unrelated page about lighting {}", i)))
            .collect()
    }

    fn orchestrator(
        backend: StaticSearchBackend,
        generation: Arc<ScriptedModel>,
        search: SearchConfig,
    ) -> Orchestrator {
        orchestrator_with(Arc::new(backend), generation, search, ContextConfig::default())
    }

    fn orchestrator_with(
        backend: Arc<StaticSearchBackend>,
        generation: Arc<ScriptedModel>,
        search: SearchConfig,
        context: ContextConfig,
    ) -> Orchestrator {
        let prompts = Arc::new(PromptSet::default());
        let expansion = Arc::new(ScriptedModel::new("expansion").with_completion(&QUERIES.join("\n")));

        Orchestrator::new(
            QueryExpander::new(expansion, prompts.clone()),
            HybridSearchClient::new(
                Arc::new(MockEmbedder::new(16)),
                backend,
                &search,
                Duration::from_secs(5),
            ),
            Reranker::new(Arc::new(LexicalReranker), 5),
            ContextAssembler::new(&context),
            AnswerStreamer::new(generation, prompts),
        )
    }

    fn unity_backend() -> StaticSearchBackend {
        let translate = hit(
            "translate",
            "Use transform.Translate to move a GameObject: transform.Translate(Vector3.forward * Time.deltaTime);",
        );
        let mut first = vec![translate.clone()];
        first.extend(filler("a", 9));
        let mut second = vec![hit("position", "Set transform.position to move a GameObject instantly")];
        second.extend(filler("b", 9));
        // Duplicate of the first query's hit with a different payload
        let mut third = vec![hit("translate", "later duplicate payload")];
        third.extend(filler("c", 9));

        StaticSearchBackend::new()
            .with_hits(QUERIES[0], first)
            .with_hits(QUERIES[1], second)
            .with_hits(QUERIES[2], third)
    }

    #[tokio::test]
    async fn test_end_to_end_grounded_answer() {
        let generation = Arc::new(
            ScriptedModel::new("generation")
                .with_fragments(&["Call ", "transform.Translate", " each frame."]),
        );
        let orchestrator = orchestrator(unity_backend(), generation.clone(), SearchConfig::default());

        let prepared = assert_ok!(orchestrator.prepare(Question::new(QUESTION).unwrap()).await);

        assert_eq!(prepared.queries.len(), 3);
        assert_eq!(prepared.sources.len(), 5);
        assert!(prepared.sources.iter().any(|s| s.id == "translate"));
        assert!(prepared.sources.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));

        let prompt = generation.prompts().remove(0);
        assert!(prompt.contains("transform.Translate(Vector3.forward"));
        assert!(!prompt.contains("later duplicate payload"));
        assert!(prompt.contains("\n\n---\n\n"));

        let fragments: Vec<String> = prepared.answer.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "Call transform.Translate each frame.");
    }

    #[tokio::test]
    async fn test_no_hits_abstains() {
        let generation = Arc::new(ScriptedModel::new("generation").with_fragments(&["unused"]));
        let orchestrator = orchestrator(StaticSearchBackend::new(), generation.clone(), SearchConfig::default());

        let completed = orchestrator.answer(Question::new(QUESTION).unwrap()).await.unwrap();

        assert_eq!(completed.answer, DEFAULT_ABSTAIN_PHRASE);
        assert!(completed.sources.is_empty());
        assert!(generation.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_search_failure_fails_request() {
        let backend = unity_backend().with_failure(QUERIES[1], "backend unavailable");
        let generation = Arc::new(ScriptedModel::new("generation").with_fragments(&["unused"]));
        let orchestrator = orchestrator(backend, generation.clone(), SearchConfig::default());

        let err = orchestrator.prepare(Question::new(QUESTION).unwrap()).await.err().unwrap();

        assert!(matches!(err, AppError::SearchError { .. }));
        assert!(generation.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_isolated_search_failure_continues() {
        let backend = unity_backend().with_failure(QUERIES[1], "backend unavailable");
        let generation = Arc::new(ScriptedModel::new("generation").with_fragments(&["ok"]));
        let search = SearchConfig {
            isolate_failures: true,
            ..SearchConfig::default()
        };

        let completed = orchestrator(backend, generation, search)
            .answer(Question::new(QUESTION).unwrap())
            .await
            .unwrap();

        assert_eq!(completed.answer, "ok");
        assert!(completed.sources.iter().all(|s| s.id != "position"));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_surfaces_in_answer() {
        let generation = Arc::new(
            ScriptedModel::new("generation")
                .with_fragments(&["partial", "never"])
                .with_stream_error_after(1),
        );
        let orchestrator = orchestrator(unity_backend(), generation, SearchConfig::default());

        let err = orchestrator.answer(Question::new(QUESTION).unwrap()).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationError { .. }));
    }

    #[tokio::test]
    async fn test_sources_are_always_in_the_prompt() {
        let generation = Arc::new(ScriptedModel::new("generation").with_fragments(&["Use Translate."]));
        let context = ContextConfig {
            max_chars: Some(0),
            ..ContextConfig::default()
        };
        let orchestrator = orchestrator_with(
            Arc::new(unity_backend()),
            generation.clone(),
            SearchConfig::default(),
            context,
        );

        let completed = orchestrator.answer(Question::new(QUESTION).unwrap()).await.unwrap();

        assert!(!completed.sources.is_empty());
        assert_eq!(completed.answer, "Use Translate.");
        assert_eq!(generation.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_request_mid_retrieval_skips_generation() {
        let backend = Arc::new(unity_backend().with_delay(QUERIES[0], Duration::from_secs(5)));
        let generation = Arc::new(ScriptedModel::new("generation").with_fragments(&["unused"]));
        let orchestrator = orchestrator_with(
            backend.clone(),
            generation.clone(),
            SearchConfig::default(),
            ContextConfig::default(),
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            orchestrator.prepare(Question::new(QUESTION).unwrap()),
        )
        .await;

        assert!(abandoned.is_err());
        // Every search started, none of the later stages ran
        assert_eq!(backend.received().len(), 3);
        assert!(generation.prompts().is_empty());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::Retrieving.to_string(), "retrieving");
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Streaming.is_terminal());
    }

    #[test]
    fn test_from_config_with_mock_providers() {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.embedding.provider = "mock".into();
        config.rerank.provider = "mock".into();
        config.search.backend = "mock".into();

        assert!(Orchestrator::from_config(&config, None).is_ok());
    }

    #[test]
    fn test_from_config_postgres_requires_db() {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.embedding.provider = "mock".into();
        config.rerank.provider = "mock".into();

        assert!(matches!(
            Orchestrator::from_config(&config, None),
            Err(AppError::Configuration { .. })
        ));
    }
}
