//! End-to-end checks of ingestion, retrieval, and the chat event stream through the router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use docchat::{
    api::{AppState, cors_layer, create_router},
    chat::{ChatEvent, ChatRequest, Stage},
    embedding::HashingEmbedder,
    generation::{GenerationClient, GenerationError, GenerationRequest, TextStream},
    processing::Chunker,
    retrieval::RetrievalSettings,
};
use regex::Regex;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Answers by citing every source number found in the prompt.
struct CitingGenerator;

#[async_trait]
impl GenerationClient for CitingGenerator {
    fn name(&self) -> &'static str {
        "citing"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TextStream, GenerationError> {
        let markers: Vec<Result<String, GenerationError>> = (1..=5)
            .filter(|n| request.prompt.contains(&format!("[{n}] (File:")))
            .map(|n| Ok(format!("Point [{n}]. ")))
            .collect();
        let answer = if markers.is_empty() {
            vec![Ok("I don't know.".to_string())]
        } else {
            markers
        };
        Ok(Box::pin(futures_util::stream::iter(answer)))
    }
}

fn state() -> Arc<AppState> {
    Arc::new(AppState::new(
        Arc::new(HashingEmbedder::new(384).expect("embedder")),
        Arc::new(CitingGenerator),
        Chunker::new(40, 5).expect("chunker"),
        RetrievalSettings {
            top_k: 3,
            min_score: 0.25,
        },
    ))
}

fn router(state: &Arc<AppState>) -> Router {
    create_router(state.clone(), cors_layer(&["http://localhost:3000".to_string()]))
}

async fn send(
    state: &Arc<AppState>,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");
    let response = router(state).oneshot(request).await.expect("router response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, bytes.to_vec())
}

async fn upload(state: &Arc<AppState>, id: &str, filename: &str, pages: &[&str]) {
    let pages: Vec<Value> = pages
        .iter()
        .enumerate()
        .map(|(n, text)| json!({"page_number": n + 1, "text": text}))
        .collect();
    let (status, _) = send(
        state,
        Method::POST,
        "/api/documents",
        Some(json!({"document_id": id, "filename": filename, "pages": pages})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn frames(body: &[u8]) -> Vec<Value> {
    String::from_utf8(body.to_vec())
        .expect("utf-8 body")
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).expect("json frame"))
        .collect()
}

fn stage_pairs_are_ordered(frames: &[Value]) -> bool {
    frames
        .iter()
        .enumerate()
        .filter(|(_, frame)| frame["type"] == "tool_call" && frame["status"] == "complete")
        .all(|(position, complete)| {
            frames[..position].iter().any(|earlier| {
                earlier["type"] == "tool_call"
                    && earlier["name"] == complete["name"]
                    && earlier["status"] == "in_progress"
            })
        })
}

#[tokio::test]
async fn grounded_stream_cites_sources_in_order() {
    let state = state();
    upload(
        &state,
        "solar",
        "solar.pdf",
        &[
            "Solar panels convert sunlight into electricity using photovoltaic cells.",
            "Panel efficiency drops as cell temperature rises in summer.",
        ],
    )
    .await;
    upload(
        &state,
        "baking",
        "baking.pdf",
        &["Bread dough rises when yeast ferments sugars."],
    )
    .await;

    let (status, body) = send(
        &state,
        Method::POST,
        "/api/chat/stream",
        Some(json!({"message": "How do solar panels convert sunlight?", "use_context": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = frames(&body);
    let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    let sources_at = types.iter().position(|t| *t == "sources").expect("sources frame");
    let text_at = types.iter().position(|t| *t == "text").expect("text frame");
    assert!(sources_at < text_at, "sources must precede text: {types:?}");
    assert!(stage_pairs_are_ordered(&frames));
    assert_eq!(types.iter().filter(|t| **t == "done" || **t == "error").count(), 1);
    assert_eq!(types.last(), Some(&"done"));

    let sources = frames[sources_at]["content"].as_array().unwrap();
    assert_eq!(sources[0]["id"], 1);
    assert_eq!(sources[0]["pdf_id"], "solar");
    assert_eq!(sources[0]["page"], 1);
    assert!(sources.iter().all(|source| source["pdf_id"] != "baking"));

    let answer: String = frames
        .iter()
        .filter(|f| f["type"] == "text")
        .map(|f| f["content"].as_str().unwrap())
        .collect();
    let citation = Regex::new(r"\[(\d+)\]").unwrap();
    let cited: Vec<u64> = citation
        .captures_iter(&answer)
        .map(|captures| captures[1].parse().unwrap())
        .collect();
    assert!(!cited.is_empty());
    assert!(cited.iter().all(|id| (1..=sources.len() as u64).contains(id)));

    let stages: Vec<&str> = frames
        .iter()
        .filter(|f| f["type"] == "tool_call")
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    for stage in [
        Stage::SearchingDocuments,
        Stage::RetrievingPdf,
        Stage::AnalyzingContent,
        Stage::GeneratingResponse,
    ] {
        assert_eq!(stages.iter().filter(|name| **name == stage.as_str()).count(), 2);
    }
}

#[tokio::test]
async fn deleted_documents_are_never_cited() {
    let state = state();
    upload(
        &state,
        "solar",
        "solar.pdf",
        &["Solar panels convert sunlight into electricity."],
    )
    .await;
    upload(
        &state,
        "wind",
        "wind.pdf",
        &["Wind turbines convert moving air into electricity."],
    )
    .await;
    let before = state.registry().index().len();
    let solar_chunks = state.registry().get("solar").expect("solar record").chunk_count;

    let (status, _) = send(&state, Method::DELETE, "/api/documents/solar", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.registry().index().len(), before - solar_chunks);

    let (status, body) = send(
        &state,
        Method::POST,
        "/api/chat",
        Some(json!({
            "message": "Which devices convert sunlight into electricity?",
            "use_context": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).expect("json reply");
    assert_eq!(reply["success"], true);
    let sources = reply["sources"].as_array().unwrap();
    assert!(sources.iter().all(|source| source["pdf_id"] == "wind"));
}

#[tokio::test]
async fn document_filter_restricts_citations() {
    let state = state();
    upload(&state, "solar", "solar.pdf", &["Solar electricity output depends on sunlight."]).await;
    upload(&state, "wind", "wind.pdf", &["Wind electricity output depends on air speed."]).await;

    let (_, body) = send(
        &state,
        Method::POST,
        "/api/chat",
        Some(json!({
            "message": "What does electricity output depend on?",
            "use_context": true,
            "document_ids": ["wind"]
        })),
    )
    .await;
    let reply: Value = serde_json::from_slice(&body).expect("json reply");
    let sources = reply["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["pdf_id"], "wind");
    assert_eq!(reply["message"], "Point [1]. ");
}

#[tokio::test]
async fn unrelated_question_streams_without_sources() {
    let state = state();
    upload(
        &state,
        "solar",
        "solar.pdf",
        &["Solar panels convert sunlight into electricity."],
    )
    .await;

    let (_, body) = send(
        &state,
        Method::POST,
        "/api/chat/stream",
        Some(json!({"message": "quantum chromodynamics gluons", "use_context": true})),
    )
    .await;
    let events: Vec<ChatEvent> = frames(&body)
        .into_iter()
        .filter_map(|frame| match frame["type"].as_str()? {
            "sources" => Some(ChatEvent::Sources(Vec::new())),
            "text" => Some(ChatEvent::Text(frame["content"].as_str()?.to_string())),
            "done" => Some(ChatEvent::Done),
            "error" => Some(ChatEvent::Error(frame["content"].as_str()?.to_string())),
            _ => None,
        })
        .collect();

    assert!(!events.iter().any(|event| matches!(event, ChatEvent::Sources(_))));
    assert_eq!(events.first(), Some(&ChatEvent::Text("I don't know.".into())));
    assert_eq!(events.last(), Some(&ChatEvent::Done));
}

#[tokio::test]
async fn request_defaults_to_plain_chat() {
    let request: ChatRequest = serde_json::from_value(json!({"message": "hi"})).expect("request");
    assert!(!request.use_context);
    assert!(request.document_ids.is_none());

    let state = state();
    let (_, body) = send(
        &state,
        Method::POST,
        "/api/chat/stream",
        Some(json!({"message": "hi"})),
    )
    .await;
    let names: Vec<String> = frames(&body)
        .iter()
        .filter(|f| f["type"] == "tool_call")
        .map(|f| f["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["generating_response", "generating_response"]);
}
