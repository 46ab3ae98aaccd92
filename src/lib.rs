#![deny(missing_docs)]

//! Core library for the document chat service: in-memory vector retrieval over uploaded
//! documents and a streaming, citation-bearing chat pipeline.

/// HTTP routing and REST handlers.
pub mod api;
/// Chat events, orchestration, and stream encoding.
pub mod chat;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Streaming answer generation providers.
pub mod generation;
/// Exact cosine-similarity vector index.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Service metrics helpers.
pub mod metrics;
/// Document ingestion pipeline utilities.
pub mod processing;
/// Document metadata and passage ownership.
pub mod registry;
/// Query-time retrieval and citation numbering.
pub mod retrieval;
