//! Core data types and error definitions for document ingestion.

use crate::{embedding::EmbeddingError, registry::RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while turning page text into passages.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible word budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for new words in every passage.
    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidOverlap {
        /// Requested overlap in words.
        overlap: usize,
        /// Passage budget in words.
        chunk_size: usize,
    },
}

/// Errors emitted by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Document arrived without a usable filename.
    #[error("document filename must not be empty")]
    EmptyFilename,
    /// Embedding provider failed to produce vectors for the passages.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Registry or vector index rejected the document.
    #[error("Failed to index document: {0}")]
    Registry(#[from] RegistryError),
}

/// Text of one extracted page, as supplied by the PDF extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number; `None` when extraction could not attribute the text.
    #[serde(default)]
    pub page_number: Option<u32>,
    /// Extracted text of the page.
    #[serde(default)]
    pub text: String,
}

/// Passage produced by the chunker before it is embedded and indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCandidate {
    /// Page the passage was cut from.
    pub page_number: Option<u32>,
    /// Position of the passage within its page.
    pub ordinal: usize,
    /// Passage text, never blank.
    pub text: String,
}

/// Document handed over by the ingestion collaborator after PDF extraction.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Identifier assigned at upload; generated when absent.
    pub document_id: Option<String>,
    /// Display filename.
    pub filename: String,
    /// Title from PDF metadata, if any.
    pub title: Option<String>,
    /// Author from PDF metadata, if any.
    pub author: Option<String>,
    /// Page count from PDF metadata; defaults to the number of supplied pages.
    pub page_count: Option<u32>,
    /// Extracted text per page, in page order.
    pub pages: Vec<PageText>,
}
