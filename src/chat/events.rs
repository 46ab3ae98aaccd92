//! Typed chat events and their wire shape.
//!
//! Every event serializes to a single-line JSON object tagged by `type`, which is what the
//! stream encoder frames and the non-streaming endpoint folds.

use super::components::{Component, ComponentKind};
use crate::retrieval::Source;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Characters of excerpt kept in the wire preview of a source.
pub const SOURCE_PREVIEW_CHARS: usize = 150;

/// Pipeline stages surfaced to the client as tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Query embedding and vector search.
    SearchingDocuments,
    /// Resolving hits into citable sources.
    RetrievingPdf,
    /// Prompt and component preparation.
    AnalyzingContent,
    /// Model output streaming.
    GeneratingResponse,
}

impl Stage {
    /// Wire name of the stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SearchingDocuments => "searching_documents",
            Stage::RetrievingPdf => "retrieving_pdf",
            Stage::AnalyzingContent => "analyzing_content",
            Stage::GeneratingResponse => "generating_response",
        }
    }
}

/// Progress of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage started.
    InProgress,
    /// Stage finished.
    Complete,
}

/// One event in a chat response.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Stage progress marker.
    ToolCall {
        /// Stage being reported.
        stage: Stage,
        /// Whether the stage started or finished.
        status: StageStatus,
    },
    /// Structured UI payload.
    Component(Component),
    /// Ordered citation list.
    Sources(Vec<Source>),
    /// Fragment of model output.
    Text(String),
    /// Successful end of the response.
    Done,
    /// Failed end of the response, with a display-safe message.
    Error(String),
}

impl ChatEvent {
    /// Convenience constructor for a stage start.
    pub fn started(stage: Stage) -> Self {
        ChatEvent::ToolCall {
            stage,
            status: StageStatus::InProgress,
        }
    }

    /// Convenience constructor for a stage completion.
    pub fn completed(stage: Stage) -> Self {
        ChatEvent::ToolCall {
            stage,
            status: StageStatus::Complete,
        }
    }

    /// `done` and `error` end a response; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done | ChatEvent::Error(_))
    }

    /// Wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::ToolCall { .. } => "tool_call",
            ChatEvent::Component(_) => "component",
            ChatEvent::Sources(_) => "sources",
            ChatEvent::Text(_) => "text",
            ChatEvent::Done => "done",
            ChatEvent::Error(_) => "error",
        }
    }
}

/// Wire form of a source: short ids and a one-line preview instead of the full excerpt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireSource {
    /// Citation number.
    pub id: usize,
    /// Owning document.
    pub pdf_id: String,
    /// Display filename.
    pub filename: String,
    /// 1-based page, `null` when unknown.
    pub page: Option<u32>,
    /// Flattened, truncated excerpt.
    pub text: String,
}

impl From<&Source> for WireSource {
    fn from(source: &Source) -> Self {
        Self {
            id: source.citation_id,
            pdf_id: source.document_id.clone(),
            filename: source.filename.clone(),
            page: source.page,
            text: preview(&source.excerpt_text, SOURCE_PREVIEW_CHARS),
        }
    }
}

/// Flatten `text` onto one line and cut it at `limit` characters, marking the cut with `...`.
pub fn preview(text: &str, limit: usize) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    match flat.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent<'a> {
    ToolCall {
        name: Stage,
        status: StageStatus,
    },
    Component {
        name: ComponentKind,
        props: &'a Value,
    },
    Sources {
        content: Vec<WireSource>,
    },
    Text {
        content: &'a str,
    },
    Done,
    Error {
        content: &'a str,
    },
}

impl Serialize for ChatEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            ChatEvent::ToolCall { stage, status } => WireEvent::ToolCall {
                name: *stage,
                status: *status,
            },
            ChatEvent::Component(component) => WireEvent::Component {
                name: component.kind,
                props: &component.props,
            },
            ChatEvent::Sources(sources) => WireEvent::Sources {
                content: sources.iter().map(WireSource::from).collect(),
            },
            ChatEvent::Text(content) => WireEvent::Text { content },
            ChatEvent::Done => WireEvent::Done,
            ChatEvent::Error(content) => WireEvent::Error { content },
        };
        wire.serialize(serializer)
    }
}
