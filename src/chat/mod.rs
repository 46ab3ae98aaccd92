//! Retrieval-augmented chat: typed events, structured components, prompt assembly, the
//! response orchestrator, and SSE framing.

pub mod components;
pub mod encoder;
pub mod events;
pub mod orchestrator;
pub mod prompt;

pub use components::{Component, ComponentKind, UiIntent};
pub use encoder::{EncodeError, KEEP_ALIVE_INTERVAL, StreamEncoder, sse_frames};
pub use events::{ChatEvent, Stage, StageStatus, WireSource};
pub use orchestrator::{
    ChatError, ChatEvents, ChatReply, ChatRequest, ResponseOrchestrator, ResponseSession,
    SessionState,
};
