//! Document ingestion pipeline: page chunking, embedding, and registration.

pub mod chunking;
mod service;
pub mod types;

pub use chunking::Chunker;
pub use service::IngestionService;
pub use types::{ChunkCandidate, ChunkingError, IngestError, IngestRequest, PageText};
