//! Per-request response pipeline.
//!
//! A chat request runs as one producer task that walks the stages in a fixed order and pushes
//! typed events into a bounded channel. The consumer (SSE encoder or the non-streaming fold)
//! pulls them in order. Dropping the consumer closes the channel; the producer notices at its
//! next send or while waiting on the model, drops the provider stream, and stops.

use super::components::{ComponentKind, UiIntent};
use super::events::{ChatEvent, Stage, StageStatus, WireSource};
use super::prompt;
use crate::{
    generation::{GenerationClient, GenerationError},
    metrics::ServiceMetrics,
    retrieval::{RetrievalError, RetrievalPlanner, Source},
};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 32;
const FAILURE_REPLY: &str = "I'm sorry, I encountered an error processing your request.";
const TRUNCATED_REPLY: &str = "The response ended unexpectedly.";

/// Chat request accepted by both chat endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Ground the answer in indexed documents.
    #[serde(default)]
    pub use_context: bool,
    /// Restrict retrieval to these documents when non-empty.
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

/// Failures that end a response with an `error` event.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Query embedding or vector search failed.
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    /// The model could not start or finish its answer.
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl ChatError {
    /// Message safe to show to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::Retrieval(_) => {
                "Could not search your documents right now. Please try again."
            }
            ChatError::Generation(GenerationError::ProviderUnavailable(_)) => {
                "The AI service is unavailable right now. Please try again later."
            }
            ChatError::Generation(_) => {
                "The AI service failed while generating a response. Please try again."
            }
        }
    }
}

/// Position of a response in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request accepted, nothing emitted.
    Idle,
    /// Retrieval running.
    Searching,
    /// Sources resolved.
    Retrieved,
    /// Preparing prompt and components.
    Analyzing,
    /// Component emitted.
    GeneratingUi,
    /// Relaying model output.
    GeneratingText,
    /// Finished with `done`.
    Done,
    /// Finished with `error`.
    Error,
    /// Client went away.
    Cancelled,
}

impl SessionState {
    /// Whether the response has ended.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Error | SessionState::Cancelled
        )
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Done | Error | Cancelled, _) => false,
            (_, Error | Cancelled) => true,
            (Idle, Searching | GeneratingText)
            | (Searching, Retrieved)
            | (Retrieved, Analyzing)
            | (Analyzing, GeneratingUi | GeneratingText)
            | (GeneratingUi, GeneratingText)
            | (GeneratingText, Done) => true,
            _ => false,
        }
    }
}

/// State threaded through one response.
#[derive(Debug)]
pub struct ResponseSession {
    state: SessionState,
    sources: Vec<Source>,
    stages: Vec<(Stage, StageStatus)>,
    components: Vec<ComponentKind>,
    text: String,
}

impl ResponseSession {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            sources: Vec::new(),
            stages: Vec::new(),
            components: Vec::new(),
            text: String::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sources cited by this response.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Tool calls emitted so far, in order.
    pub fn stages(&self) -> &[(Stage, StageStatus)] {
        &self.stages
    }

    /// Components emitted so far.
    pub fn components(&self) -> &[ComponentKind] {
        &self.components
    }

    /// Model text relayed so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::trace!(from = ?self.state, to = ?next, "Chat session transition");
        self.state = next;
    }

    fn observe(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::ToolCall { stage, status } => self.stages.push((*stage, *status)),
            ChatEvent::Component(component) => self.components.push(component.kind),
            ChatEvent::Text(delta) => self.text.push_str(delta),
            ChatEvent::Sources(_) | ChatEvent::Done | ChatEvent::Error(_) => {}
        }
    }
}

enum Interrupt {
    Cancelled,
    Failed(ChatError),
}

impl From<RetrievalError> for Interrupt {
    fn from(error: RetrievalError) -> Self {
        Interrupt::Failed(error.into())
    }
}

impl From<GenerationError> for Interrupt {
    fn from(error: GenerationError) -> Self {
        Interrupt::Failed(error.into())
    }
}

/// Session plus the sending half of the event channel.
struct Pipeline {
    session: ResponseSession,
    tx: mpsc::Sender<ChatEvent>,
    terminated: bool,
}

impl Pipeline {
    fn new(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            session: ResponseSession::new(),
            tx,
            terminated: false,
        }
    }

    async fn emit(&mut self, event: ChatEvent) -> Result<(), Interrupt> {
        if self.terminated {
            tracing::warn!(kind = event.kind(), "Dropping event emitted after terminal event");
            return Ok(());
        }
        self.terminated = event.is_terminal();
        self.session.observe(&event);
        self.tx.send(event).await.map_err(|_| Interrupt::Cancelled)
    }

    /// Run `work` unless the consumer disconnects first.
    async fn guard<F: Future>(&self, work: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = self.tx.closed() => Err(Interrupt::Cancelled),
            output = work => Ok(output),
        }
    }
}

/// Ordered events of one response, ending after `done` or `error`.
pub struct ChatEvents {
    rx: mpsc::Receiver<ChatEvent>,
}

impl ChatEvents {
    pub(crate) fn from_receiver(rx: mpsc::Receiver<ChatEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for ChatEvents {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatEvent>> {
        self.rx.poll_recv(cx)
    }
}

/// Body of the non-streaming chat endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    /// Full answer text, or an apology on failure.
    pub message: String,
    /// Cited sources in wire form.
    pub sources: Vec<WireSource>,
    /// Whether the pipeline reached `done`.
    pub success: bool,
    /// Display-safe failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives retrieval, component detection, and generation for chat requests.
pub struct ResponseOrchestrator {
    planner: Arc<RetrievalPlanner>,
    generator: Arc<dyn GenerationClient>,
    metrics: Arc<ServiceMetrics>,
}

impl ResponseOrchestrator {
    /// Assemble an orchestrator from shared components.
    pub fn new(
        planner: Arc<RetrievalPlanner>,
        generator: Arc<dyn GenerationClient>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            planner,
            generator,
            metrics,
        }
    }

    /// Provider label of the generation client.
    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    /// Spawn the pipeline for `request` and return its event stream.
    pub fn start(self: &Arc<Self>, request: ChatRequest) -> ChatEvents {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(request, tx).await;
        });
        ChatEvents::from_receiver(rx)
    }

    /// Run the pipeline to completion and fold its events into a single reply.
    pub async fn respond(self: &Arc<Self>, request: ChatRequest) -> ChatReply {
        let mut events = self.start(request);
        let mut message = String::new();
        let mut sources = Vec::new();
        while let Some(event) = events.next().await {
            match event {
                ChatEvent::Text(delta) => message.push_str(&delta),
                ChatEvent::Sources(list) => {
                    sources = list.iter().map(WireSource::from).collect();
                }
                ChatEvent::Done => {
                    return ChatReply {
                        message,
                        sources,
                        success: true,
                        error: None,
                    };
                }
                ChatEvent::Error(error) => {
                    return ChatReply {
                        message: FAILURE_REPLY.to_string(),
                        sources,
                        success: false,
                        error: Some(error),
                    };
                }
                ChatEvent::ToolCall { .. } | ChatEvent::Component(_) => {}
            }
        }
        ChatReply {
            message: FAILURE_REPLY.to_string(),
            sources,
            success: false,
            error: Some(TRUNCATED_REPLY.to_string()),
        }
    }

    /// Run the pipeline, sending events to `tx`, and return the final session.
    ///
    /// Exactly one of `done` or `error` is sent unless the receiver is dropped first, in which
    /// case the session ends `Cancelled` and nothing further is sent.
    pub async fn run(&self, request: ChatRequest, tx: mpsc::Sender<ChatEvent>) -> ResponseSession {
        self.metrics.record_chat_started();
        let mut pipeline = Pipeline::new(tx);

        match self.drive(&request, &mut pipeline).await {
            Ok(()) => {
                tracing::info!(
                    use_context = request.use_context,
                    sources = pipeline.session.sources.len(),
                    characters = pipeline.session.text.len(),
                    "Chat response complete"
                );
            }
            Err(Interrupt::Cancelled) => {
                pipeline.session.advance(SessionState::Cancelled);
                self.metrics.record_chat_cancelled();
                tracing::debug!(
                    stages = pipeline.session.stages.len(),
                    "Client disconnected; chat response cancelled"
                );
            }
            Err(Interrupt::Failed(error)) => {
                tracing::error!(
                    error = %error,
                    state = ?pipeline.session.state,
                    "Chat response failed"
                );
                pipeline.session.advance(SessionState::Error);
                self.metrics.record_chat_failed();
                let message = error.user_message().to_string();
                if pipeline.emit(ChatEvent::Error(message)).await.is_err() {
                    tracing::debug!("Client disconnected before the error event was delivered");
                }
            }
        }
        pipeline.session
    }

    async fn drive(&self, request: &ChatRequest, pipeline: &mut Pipeline) -> Result<(), Interrupt> {
        if request.use_context {
            self.gather_context(request, pipeline).await?;
        }
        self.generate(request, pipeline).await
    }

    async fn gather_context(
        &self,
        request: &ChatRequest,
        pipeline: &mut Pipeline,
    ) -> Result<(), Interrupt> {
        pipeline.session.advance(SessionState::Searching);
        pipeline
            .emit(ChatEvent::started(Stage::SearchingDocuments))
            .await?;
        let sources = pipeline
            .guard(
                self.planner
                    .plan_within(&request.message, request.document_ids.as_deref()),
            )
            .await??;
        pipeline
            .emit(ChatEvent::completed(Stage::SearchingDocuments))
            .await?;
        pipeline.session.advance(SessionState::Retrieved);

        if !sources.is_empty() {
            pipeline.emit(ChatEvent::started(Stage::RetrievingPdf)).await?;
            pipeline
                .emit(ChatEvent::completed(Stage::RetrievingPdf))
                .await?;
            pipeline.session.sources = sources.clone();
            pipeline.emit(ChatEvent::Sources(sources)).await?;
        }

        pipeline.session.advance(SessionState::Analyzing);
        pipeline
            .emit(ChatEvent::started(Stage::AnalyzingContent))
            .await?;
        let component = UiIntent::classify(&request.message).build(&pipeline.session.sources);
        pipeline
            .emit(ChatEvent::completed(Stage::AnalyzingContent))
            .await?;

        if let Some(component) = component {
            pipeline.session.advance(SessionState::GeneratingUi);
            pipeline.emit(ChatEvent::Component(component)).await?;
        }
        Ok(())
    }

    async fn generate(
        &self,
        request: &ChatRequest,
        pipeline: &mut Pipeline,
    ) -> Result<(), Interrupt> {
        pipeline.session.advance(SessionState::GeneratingText);
        pipeline
            .emit(ChatEvent::started(Stage::GeneratingResponse))
            .await?;

        let generation = prompt::generation_request(&request.message, &pipeline.session.sources);
        let mut deltas = pipeline.guard(self.generator.stream(generation)).await??;
        loop {
            match pipeline.guard(deltas.next()).await? {
                Some(Ok(delta)) if delta.is_empty() => {}
                Some(Ok(delta)) => pipeline.emit(ChatEvent::Text(delta)).await?,
                Some(Err(error)) => return Err(error.into()),
                None => break,
            }
        }

        pipeline
            .emit(ChatEvent::completed(Stage::GeneratingResponse))
            .await?;
        pipeline.emit(ChatEvent::Done).await?;
        pipeline.session.advance(SessionState::Done);
        Ok(())
    }
}
