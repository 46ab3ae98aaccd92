//! HTTP surface for the document chat service.
//!
//! The router exposes a compact set of endpoints:
//!
//! - `GET /`, `GET /api/health`, `GET /api/status` – banner, liveness, and index/metrics status.
//! - `POST /api/documents` – Chunk, embed, and register extracted page text. Returns `201` with
//!   the stored document record.
//! - `GET /api/documents`, `GET /api/documents/:doc_id`, `DELETE /api/documents/:doc_id` –
//!   Registry listing, lookup, and removal (removal drops every owned passage before returning).
//! - `POST /api/chat` – Run the chat pipeline and return the folded answer.
//! - `POST /api/chat/stream` – Run the chat pipeline and relay its events as server-sent events.

use crate::{
    chat::{ChatReply, ChatRequest, KEEP_ALIVE_INTERVAL, ResponseOrchestrator, sse_frames},
    config::Config,
    embedding::{Embedder, EmbeddingError, build_embedder},
    generation::{GenerationClient, GenerationError, build_generator},
    index::{IndexError, IndexStats, VectorIndex},
    metrics::{MetricsSnapshot, ServiceMetrics},
    processing::{Chunker, ChunkingError, IngestError, IngestRequest, IngestionService, PageText},
    registry::{DocumentRecord, DocumentRegistry, RegistryError},
    retrieval::{RetrievalPlanner, RetrievalSettings},
};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Failures while wiring the service from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Embedding provider could not be constructed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Generation provider could not be constructed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Chunking parameters are invalid.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
}

/// Shared handles used by every request handler.
pub struct AppState {
    registry: Arc<DocumentRegistry>,
    ingestion: IngestionService,
    orchestrator: Arc<ResponseOrchestrator>,
    metrics: Arc<ServiceMetrics>,
    settings: RetrievalSettings,
    embedding_provider: &'static str,
}

impl AppState {
    /// Wire an empty index, registry, and pipelines around the given providers.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn GenerationClient>,
        chunker: Chunker,
        settings: RetrievalSettings,
    ) -> Self {
        let metrics = Arc::new(ServiceMetrics::new());
        let registry = Arc::new(DocumentRegistry::new(Arc::new(VectorIndex::new())));
        let ingestion = IngestionService::new(
            embedder.clone(),
            registry.clone(),
            chunker,
            metrics.clone(),
        );
        let planner = Arc::new(RetrievalPlanner::new(
            embedder.clone(),
            registry.clone(),
            settings,
        ));
        let orchestrator = Arc::new(ResponseOrchestrator::new(
            planner,
            generator,
            metrics.clone(),
        ));
        Self {
            registry,
            ingestion,
            orchestrator,
            metrics,
            settings,
            embedding_provider: embedder.name(),
        }
    }

    /// Build providers and pipelines from configuration.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let embedder = build_embedder(config)?;
        let generator = build_generator(config)?;
        let chunker = Chunker::new(config.chunk_size_words, config.chunk_overlap_words)?;
        let settings = RetrievalSettings {
            top_k: config.retrieval_top_k,
            min_score: config.retrieval_min_score,
        };
        Ok(Self::new(embedder, generator, chunker, settings))
    }

    /// Document registry backing this state.
    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }
}

/// Build a CORS layer honoring the configured origins; `*` or an empty list allows any origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the HTTP router over shared state.
pub fn create_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/documents", get(list_documents).post(upload_document))
        .route(
            "/api/documents/:doc_id",
            get(get_document).delete(delete_document),
        )
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "documents": state.registry.len(),
    }))
}

/// Response body for `GET /api/status`.
#[derive(Serialize)]
struct StatusResponse {
    index: IndexStats,
    metrics: MetricsSnapshot,
    providers: Providers,
    retrieval: RetrievalView,
}

#[derive(Serialize)]
struct Providers {
    embedding: &'static str,
    generation: &'static str,
}

#[derive(Serialize)]
struct RetrievalView {
    top_k: usize,
    min_score: f32,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        index: state.registry.index().stats(),
        metrics: state.metrics.snapshot(),
        providers: Providers {
            embedding: state.embedding_provider,
            generation: state.orchestrator.generator_name(),
        },
        retrieval: RetrievalView {
            top_k: state.settings.top_k,
            min_score: state.settings.min_score,
        },
    })
}

/// Request body for `POST /api/documents`: text already extracted from a PDF.
#[derive(Deserialize)]
struct UploadRequest {
    #[serde(default)]
    document_id: Option<String>,
    filename: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    page_count: Option<u32>,
    #[serde(default)]
    pages: Vec<PageText>,
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<DocumentRecord>), AppError> {
    let UploadRequest {
        document_id,
        filename,
        title,
        author,
        page_count,
        pages,
    } = request;
    let record = state
        .ingestion
        .ingest(IngestRequest {
            document_id,
            filename,
            title,
            author,
            page_count,
            pages,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Response body for `GET /api/documents`.
#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentRecord>,
    total: usize,
}

async fn list_documents(State(state): State<Arc<AppState>>) -> Json<DocumentList> {
    let documents = state.registry.list();
    Json(DocumentList {
        total: documents.len(),
        documents,
    })
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentRecord>, AppError> {
    state
        .registry
        .get(&doc_id)
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(doc_id).into())
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state.ingestion.delete(&doc_id)?;
    Ok(Json(json!({
        "message": "Document deleted successfully",
        "document_id": record.document_id,
        "chunks_removed": record.chunk_count,
    })))
}

fn validate_chat(request: &ChatRequest) -> Result<(), AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "message must not be empty",
        ));
    }
    Ok(())
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    validate_chat(&request)?;
    Ok(Json(state.orchestrator.respond(request).await))
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    validate_chat(&request)?;
    tracing::debug!(use_context = request.use_context, "Opening chat stream");
    let events = state.orchestrator.start(request);
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(sse_frames(events, KEEP_ALIVE_INTERVAL)),
    )
        .into_response())
}

/// Error response carrying a status code and a `detail` message.
struct AppError {
    status: StatusCode,
    detail: String,
}

impl AppError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(inner: RegistryError) -> Self {
        let status = match &inner {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyRegistered(_) => StatusCode::CONFLICT,
            RegistryError::Index(IndexError::DimensionMismatch { .. })
            | RegistryError::Index(IndexError::EmptyVector) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, inner.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(inner: IngestError) -> Self {
        match inner {
            IngestError::EmptyFilename => Self::new(StatusCode::BAD_REQUEST, inner.to_string()),
            IngestError::Embedding(_) => {
                tracing::error!(error = %inner, "Embedding provider failed during ingestion");
                Self::new(StatusCode::BAD_GATEWAY, inner.to_string())
            }
            IngestError::Registry(registry) => registry.into(),
        }
    }
}
