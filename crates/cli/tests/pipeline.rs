//! End-to-end tests for the retrieve → budget → engine pipeline.
//!
//! Everything runs in-process: a scripted model endpoint that also embeds
//! by keyword, in-memory collections and an in-memory passage store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ragstream_agent::{
    ChatSession, EngineSettings, PromptBudget, PromptBudgeter, StreamEvent, ToolCallEngine,
    TurnOutcome,
};
use ragstream_core::error::{ProviderError, RetrievalError};
use ragstream_core::message::Role;
use ragstream_core::provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest,
    ProviderResponse, StreamChunk, ToolCallDelta,
};
use ragstream_core::retrieval::{
    MetadataFilter, Passage, PassageId, RankedHit, VectorCollection,
};
use ragstream_retrieval::{
    FusionQuery, FusionRetriever, InMemoryCollection, InMemoryPassageStore, ProviderEmbedder,
};
use tokio::sync::mpsc;

const TEMPLATE: &str = "History:\n{conversation_history}\n\nContext:\n{retrieved_context}\n\nQuestion: {user_query}";

// ── Mock endpoint ────────────────────────────────────────────────────────

/// Streams scripted rounds and embeds text onto three keyword axes.
struct MockEndpoint {
    rounds: Mutex<VecDeque<Vec<StreamChunk>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockEndpoint {
    fn new(rounds: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    let axis = |words: &[&str]| {
        if words.iter().any(|w| text.contains(w)) {
            1.0
        } else {
            0.0
        }
    };
    vec![
        axis(&["bangladesh", "dhaka"]),
        axis(&["france", "paris"]),
        0.1,
    ]
}

#[async_trait::async_trait]
impl Provider for MockEndpoint {
    fn name(&self) -> &str {
        "mock_endpoint"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("mock endpoint only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockEndpoint ran out of rounds");

        let (tx, rx) = mpsc::channel(round.len().max(1));
        for chunk in round {
            tx.try_send(Ok(chunk)).unwrap();
        }
        Ok(rx)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| keyword_vector(t)).collect(),
            model: request.model,
            usage: None,
        })
    }
}

/// A collection whose backend is down.
struct DownCollection;

#[async_trait::async_trait]
impl VectorCollection for DownCollection {
    fn name(&self) -> &str {
        "down"
    }

    async fn search(
        &self,
        _vector: &[f32],
        _k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        Err(RetrievalError::CollectionUnavailable {
            collection: "down".into(),
            reason: "connection refused".into(),
        })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn passage(id: &str, text: &str) -> Passage {
    Passage {
        id: PassageId::new(id),
        text: text.into(),
        metadata: Default::default(),
    }
}

async fn knowledge_base(
    endpoint: Arc<MockEndpoint>,
    extra: Option<Arc<dyn VectorCollection>>,
) -> Arc<FusionRetriever> {
    let corpus = [
        passage("p-dhaka", "Dhaka is the capital of Bangladesh."),
        passage("p-paris", "Paris is the capital of France."),
        passage("p-rivers", "Bangladesh has over 700 rivers, Dhaka sits on the Buriganga."),
    ];

    let store = Arc::new(InMemoryPassageStore::new());
    let wiki = Arc::new(InMemoryCollection::new("wiki"));
    let faq = Arc::new(InMemoryCollection::new("faq"));
    for p in &corpus {
        store.upsert(p.clone()).await;
        wiki.insert(p.id.clone(), keyword_vector(&p.text), Default::default())
            .await;
    }
    faq.insert("p-paris", keyword_vector(&corpus[1].text), Default::default())
        .await;
    faq.insert("p-dhaka", keyword_vector(&corpus[0].text), Default::default())
        .await;

    let mut collections: Vec<Arc<dyn VectorCollection>> = vec![wiki, faq];
    collections.extend(extra);

    let embedder = Arc::new(ProviderEmbedder::new(endpoint, "mock-embed"));
    Arc::new(FusionRetriever::new(embedder, collections, store))
}

fn query_template() -> FusionQuery {
    FusionQuery::new("").with_top_k(2).with_max_selected(2)
}

fn query(text: &str) -> FusionQuery {
    let mut query = query_template();
    query.text = text.into();
    query
}

fn session(endpoint: Arc<MockEndpoint>, retriever: Arc<FusionRetriever>, budget: PromptBudget) -> ChatSession {
    let tools = ragstream_tools::default_registry(retriever, query_template());
    let engine = ToolCallEngine::new(endpoint, tools, EngineSettings::new("mock-model"));
    ChatSession::new(engine, PromptBudgeter::heuristic(budget), TEMPLATE, 4)
}

fn roomy_budget() -> PromptBudget {
    PromptBudget {
        max_tokens: 8000,
        reservation_tokens: 1000,
        history_fraction: 0.5,
    }
}

fn tool_fragment(id: Option<&str>, name: Option<&str>, args: Option<&str>) -> StreamChunk {
    StreamChunk::tool_delta(ToolCallDelta {
        index: 0,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: args.map(String::from),
    })
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn grounded_turn_with_follow_up_retrieval() {
    let endpoint = Arc::new(MockEndpoint::new(vec![
        vec![
            StreamChunk::text("Let me look that up. "),
            tool_fragment(Some("call_1"), Some("retrieve_"), None),
            tool_fragment(None, Some("knowledge"), Some("{\"query\": ")),
            tool_fragment(None, None, Some("\"rivers of Bangladesh\"}")),
            StreamChunk::done(),
        ],
        vec![
            StreamChunk::text("Dhaka is the capital, "),
            StreamChunk::text("on the Buriganga."),
            StreamChunk::done(),
        ],
    ]));
    let retriever = knowledge_base(endpoint.clone(), None).await;

    // Up-front retrieval feeds the system prompt
    let question = "What is the capital of Bangladesh?";
    let passages = retriever
        .fuse(&query(question))
        .await
        .unwrap();
    let ids: Vec<&str> = passages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p-dhaka", "p-rivers"]);
    let context: Vec<String> = passages.into_iter().map(|p| p.text).collect();

    let mut session = session(endpoint.clone(), retriever, roomy_budget());
    let mut events = Vec::new();
    let summary = session
        .ask(question, &context, |e| events.push(e.clone()))
        .await;

    assert_eq!(summary.outcome, TurnOutcome::Answered);
    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.tool_calls, 1);
    assert_eq!(
        summary.answer,
        "Let me look that up. Dhaka is the capital, on the Buriganga."
    );
    assert!(summary.recorded);

    // Event order: text, tool invoked, tool result, text, done
    let kinds: Vec<&str> = events.iter().map(StreamEvent::event_type).collect();
    assert_eq!(
        kinds,
        vec!["text_delta", "tool_invoked", "tool_result", "text_delta", "text_delta", "done"]
    );
    match &events[2] {
        StreamEvent::ToolResult {
            call_id,
            name,
            content,
            success,
        } => {
            assert_eq!(call_id, "call_1");
            assert_eq!(name, "retrieve_knowledge");
            assert!(success);
            assert!(content.contains("p-rivers"));
        }
        other => panic!("Expected ToolResult, got: {other:?}"),
    }

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 2);

    let system = &requests[0].messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("Dhaka is the capital of Bangladesh."));
    assert!(system.content.ends_with(question));
    assert!(requests[0].tools.iter().any(|t| t.name == "retrieve_knowledge"));

    let second = &requests[1].messages;
    let call = &second[2].tool_calls[0];
    assert_eq!(call.name, "retrieve_knowledge");
    assert_eq!(call.arguments, r#"{"query":"rivers of Bangladesh"}"#);
    assert_eq!(second[3].role, Role::Tool);
    assert_eq!(second[3].tool_call_id.as_deref(), Some("call_1"));
    assert!(second[3].content.contains("Buriganga"));

    // The answer carries into the next prompt
    let next = session.prepare("And France?", &[]);
    assert!(next.text.contains("User: What is the capital of Bangladesh?"));
}

#[tokio::test]
async fn failed_collection_degrades_without_failing_the_turn() {
    let endpoint = Arc::new(MockEndpoint::new(vec![
        vec![
            tool_fragment(Some("c1"), Some("retrieve_knowledge"), Some("{\"query\":\"Paris\"}")),
            StreamChunk::done(),
        ],
        vec![StreamChunk::text("Paris."), StreamChunk::done()],
    ]));
    let retriever = knowledge_base(endpoint.clone(), Some(Arc::new(DownCollection))).await;

    let outcome = retriever
        .fuse_detailed(&query("capital of France"))
        .await
        .unwrap();
    assert_eq!(outcome.failed_collections, vec!["down".to_string()]);
    assert_eq!(outcome.passages[0].id.as_str(), "p-paris");

    let mut session = session(endpoint.clone(), retriever, roomy_budget());
    let mut results = Vec::new();
    let summary = session
        .ask("Capital of France?", &[], |e| {
            if let StreamEvent::ToolResult { success, content, .. } = e {
                results.push((*success, content.clone()));
            }
        })
        .await;

    assert_eq!(summary.outcome, TurnOutcome::Answered);
    assert_eq!(results.len(), 1);
    assert!(results[0].0);
    assert!(results[0].1.contains("Paris is the capital of France."));
}

#[tokio::test]
async fn tight_budget_keeps_prompt_under_ceiling() {
    let endpoint = Arc::new(MockEndpoint::new(vec![vec![
        StreamChunk::text("Short answer."),
        StreamChunk::done(),
    ]]));
    let retriever = knowledge_base(endpoint.clone(), None).await;

    let budget = PromptBudget {
        max_tokens: 120,
        reservation_tokens: 20,
        history_fraction: 0.3,
    };
    let context: Vec<String> = (0..10)
        .map(|i| format!("Passage {i}: {}", "Dhaka grows every year. ".repeat(6)))
        .collect();

    let mut session = session(endpoint.clone(), retriever, budget);
    let summary = session.ask("How big is Dhaka?", &context, |_| {}).await;

    assert!(summary.prompt.tokens <= 120);
    assert!(summary.prompt.context.units_included < context.len());
    assert_eq!(summary.prompt.context.units_total, context.len());
    // Most relevant passages survive
    assert!(endpoint.requests()[0].messages[0].content.contains("Passage 0:"));
}
