//! Document metadata and ownership of indexed passages.
//!
//! The registry is the only writer of the vector index. Registration and removal are serialized
//! through one writer lock, and both orders are chosen so that any passage visible to a search
//! always has a registered owner: metadata goes in before passages, passages come out before
//! metadata.

use crate::index::{Chunk, IndexError, VectorIndex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised by registry lifecycle operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No document is registered under the identifier.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// A document with this identifier is already registered.
    #[error("Document {0} is already registered")]
    AlreadyRegistered(String),
    /// The vector index rejected the document's passages.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Metadata describing one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    /// Identifier generated at upload.
    pub document_id: String,
    /// Display filename.
    pub filename: String,
    /// Title from PDF metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Author from PDF metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Number of pages in the source PDF.
    pub page_count: u32,
    /// Moment the document was registered.
    #[serde(with = "time::serde::rfc3339")]
    pub upload_time: OffsetDateTime,
    /// Passages owned by the document, in chunking order.
    pub chunk_ids: Vec<String>,
    /// Number of owned passages.
    pub chunk_count: usize,
}

/// Registry of uploaded documents sharing the process-wide vector index.
pub struct DocumentRegistry {
    index: Arc<VectorIndex>,
    documents: RwLock<HashMap<String, DocumentRecord>>,
    writer: Mutex<()>,
}

impl DocumentRegistry {
    /// Create an empty registry that owns passages stored in `index`.
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self {
            index,
            documents: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Vector index whose entries this registry owns.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Register a document together with its embedded passages.
    ///
    /// Passages are inserted atomically; if the index rejects them the document is not
    /// registered and the index is left untouched.
    pub fn register(
        &self,
        record: DocumentRecord,
        passages: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<DocumentRecord, RegistryError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let document_id = record.document_id.clone();
        {
            let mut documents = self
                .documents
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if documents.contains_key(&document_id) {
                return Err(RegistryError::AlreadyRegistered(document_id));
            }
            documents.insert(document_id.clone(), record.clone());
        }

        if let Err(error) = self.index.insert_batch(passages) {
            self.documents
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&document_id);
            tracing::warn!(
                document_id = %document_id,
                error = %error,
                "Index rejected document passages"
            );
            return Err(error.into());
        }

        tracing::info!(
            document_id = %document_id,
            filename = %record.filename,
            chunks = record.chunk_count,
            "Document registered"
        );
        Ok(record)
    }

    /// Remove a document and every passage it owns.
    ///
    /// Passages are gone from the index before this returns.
    pub fn remove(&self, document_id: &str) -> Result<DocumentRecord, RegistryError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if !self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(document_id)
        {
            return Err(RegistryError::NotFound(document_id.to_string()));
        }

        let removed_chunks = self.index.remove_by_document(document_id);
        let record = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
            .ok_or_else(|| RegistryError::NotFound(document_id.to_string()))?;
        tracing::info!(
            document_id,
            chunks = removed_chunks,
            "Document removed"
        );
        Ok(record)
    }

    /// Look up a document by identifier.
    pub fn get(&self, document_id: &str) -> Option<DocumentRecord> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Display filename of a document, if registered.
    pub fn filename(&self, document_id: &str) -> Option<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .map(|record| record.filename.clone())
    }

    /// All registered documents, newest first.
    pub fn list(&self) -> Vec<DocumentRecord> {
        let mut records: Vec<DocumentRecord> = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.upload_time
                .cmp(&a.upload_time)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        records
    }

    /// Number of registered documents.
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no document is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
