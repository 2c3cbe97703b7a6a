//! Wiring from config to a ready-to-run retriever, budgeter and engine.

use anyhow::Context;
use ragstream_agent::{EngineSettings, PromptBudget, PromptBudgeter, ToolCallEngine, Tokenizer};
use ragstream_config::AppConfig;
use ragstream_core::event::{DomainEvent, EventBus};
use ragstream_core::provider::Provider;
use ragstream_core::retrieval::VectorCollection;
use ragstream_providers::{OpenAiCompatProvider, RetryPolicy, RetryingProvider};
use ragstream_retrieval::{
    ChromaCollection, FusionQuery, FusionRetriever, ProviderEmbedder, SqlitePassageStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Used when `prompt.template_path` is unset.
pub const DEFAULT_TEMPLATE: &str = "\
You are a helpful assistant answering questions from a knowledge base.
Use the retrieved context when it is relevant. If it does not contain the
answer, call the retrieve_knowledge tool with a better query, or say you
don't know. Braces in answers can be written as {{ and }}.

Conversation so far:
{conversation_history}

Retrieved context:
{retrieved_context}

Current question: {user_query}";

/// Load and validate config from `path`, falling back to defaults when the
/// file does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load_from(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

pub struct Pipeline {
    pub config: AppConfig,
    pub events: Arc<EventBus>,
    pub provider: Arc<dyn Provider>,
    pub retriever: Arc<FusionRetriever>,
}

impl Pipeline {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let events = Arc::new(EventBus::default());
        spawn_event_logger(&events);

        let retry = RetryPolicy::from_config(&config.llm.retry);

        let chat = OpenAiCompatProvider::from_config(&config.llm)
            .context("Failed to build model provider")?;
        let provider: Arc<dyn Provider> = Arc::new(
            RetryingProvider::new(Arc::new(chat), retry.clone()).with_event_bus(events.clone()),
        );

        let embedding_endpoint = OpenAiCompatProvider::new(
            "embedding",
            config
                .embedding
                .base_url
                .clone()
                .unwrap_or_else(|| config.llm.base_url.clone()),
            config
                .embedding
                .api_key
                .clone()
                .or_else(|| config.llm.api_key.clone())
                .unwrap_or_default(),
            Duration::from_secs(config.llm.request_timeout_secs),
        )
        .context("Failed to build embedding provider")?;
        let embedder = ProviderEmbedder::from_config(
            Arc::new(RetryingProvider::new(Arc::new(embedding_endpoint), retry)),
            &config.embedding,
        );

        let timeout = Duration::from_secs(config.retriever.collection_timeout_secs);
        let mut collections: Vec<Arc<dyn VectorCollection>> = Vec::new();
        for name in &config.retriever.collections {
            match ChromaCollection::connect(
                &config.retriever.chroma_url,
                name,
                &config.retriever.passage_id_meta_key,
                timeout,
            )
            .await
            {
                Ok(collection) => collections.push(Arc::new(collection)),
                Err(e) => warn!(collection = %name, error = %e, "Skipping unreachable collection"),
            }
        }
        if collections.is_empty() {
            warn!("No collections available, retrieval will return nothing");
        }

        if let Some(parent) = config.retriever.passage_db.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db = config.retriever.passage_db.to_string_lossy().into_owned();
        let store = SqlitePassageStore::new(&db)
            .await
            .with_context(|| format!("Failed to open passage store at {db}"))?;

        let retriever = FusionRetriever::new(Arc::new(embedder), collections, Arc::new(store))
            .with_collection_timeout(timeout)
            .with_event_bus(events.clone());

        info!(
            model = %config.llm.model,
            collections = retriever.collection_names().len(),
            "Pipeline ready"
        );

        Ok(Self {
            config,
            events,
            provider,
            retriever: Arc::new(retriever),
        })
    }

    /// A fusion query for `text` with the configured parameters.
    pub fn query(&self, text: &str) -> FusionQuery {
        FusionQuery::from_config(text, &self.config.retriever)
    }

    /// Passage texts for `text`, best first. Retrieval failures degrade to no
    /// context.
    pub async fn context_for(&self, text: &str) -> Vec<String> {
        match self.retriever.fuse(&self.query(text)).await {
            Ok(passages) => passages.into_iter().map(|p| p.text).collect(),
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    pub fn template(&self) -> anyhow::Result<String> {
        load_template(&self.config)
    }

    pub fn budgeter(&self) -> anyhow::Result<PromptBudgeter> {
        build_budgeter(&self.config)
    }

    pub fn engine(&self) -> ToolCallEngine {
        let tools = ragstream_tools::default_registry(self.retriever.clone(), self.query(""));
        let settings = EngineSettings::from_config(&self.config.llm, &self.config.engine);
        ToolCallEngine::new(self.provider.clone(), tools, settings).with_event_bus(self.events.clone())
    }
}

/// The configured prompt template, or [`DEFAULT_TEMPLATE`].
pub fn load_template(config: &AppConfig) -> anyhow::Result<String> {
    match &config.prompt.template_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt template {}", path.display())),
        None => Ok(DEFAULT_TEMPLATE.to_string()),
    }
}

/// The prompt budgeter, with exact token counts when a tokenizer file is
/// configured and the `hf-tokenizer` feature is on.
pub fn build_budgeter(config: &AppConfig) -> anyhow::Result<PromptBudgeter> {
    let budget = PromptBudget::from_config(&config.llm, &config.prompt);
    Ok(match configured_tokenizer(config)? {
        Some(tokenizer) => PromptBudgeter::new(tokenizer, budget),
        None => PromptBudgeter::heuristic(budget),
    })
}

#[cfg(feature = "hf-tokenizer")]
fn configured_tokenizer(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn Tokenizer>>> {
    let Some(path) = &config.prompt.tokenizer_path else {
        return Ok(None);
    };
    let tokenizer = ragstream_agent::context::HfTokenizer::from_file(path)?;
    Ok(Some(Arc::new(tokenizer)))
}

#[cfg(not(feature = "hf-tokenizer"))]
fn configured_tokenizer(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn Tokenizer>>> {
    if config.prompt.tokenizer_path.is_some() {
        warn!("prompt.tokenizer_path is set but the hf-tokenizer feature is off, estimating tokens");
    }
    Ok(None)
}

fn spawn_event_logger(events: &Arc<EventBus>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event logger fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event.as_ref() {
                DomainEvent::RetrievalCompleted {
                    collections_queried,
                    collections_failed,
                    passages_returned,
                    hydration_misses,
                    ..
                } => debug!(
                    collections_queried,
                    collections_failed, passages_returned, hydration_misses, "Retrieval completed"
                ),
                DomainEvent::ToolExecuted {
                    tool_name,
                    success,
                    duration_ms,
                    ..
                } => debug!(tool = %tool_name, success, duration_ms, "Tool executed"),
                DomainEvent::ModelRetry {
                    attempt, delay_ms, reason, ..
                } => debug!(attempt, delay_ms, reason = %reason, "Model call retried"),
                DomainEvent::TurnFinished { rounds, outcome, .. } => {
                    debug!(rounds, outcome = %outcome, "Turn finished")
                }
            }
        }
    });
}
