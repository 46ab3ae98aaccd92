//! Ingestion service coordinating chunking, embedding, and registry writes.

use crate::{
    embedding::Embedder,
    index::Chunk,
    metrics::ServiceMetrics,
    processing::{
        chunking::Chunker,
        types::{IngestError, IngestRequest},
    },
    registry::{DocumentRecord, DocumentRegistry, RegistryError},
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Turns extracted documents into indexed passages and tears them down again.
///
/// Construct once near process start and share through an `Arc`; the HTTP surface and tests
/// reuse the same embedder, registry, and metrics handles.
pub struct IngestionService {
    embedder: Arc<dyn Embedder>,
    registry: Arc<DocumentRegistry>,
    chunker: Chunker,
    metrics: Arc<ServiceMetrics>,
}

impl IngestionService {
    /// Assemble an ingestion service from shared components.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        registry: Arc<DocumentRegistry>,
        chunker: Chunker,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            embedder,
            registry,
            chunker,
            metrics,
        }
    }

    /// Chunk, embed, and register a document.
    ///
    /// Embeddings are computed before any shared state is touched, so a provider failure leaves
    /// the registry and index unchanged.
    pub async fn ingest(&self, request: IngestRequest) -> Result<DocumentRecord, IngestError> {
        let IngestRequest {
            document_id,
            filename,
            title,
            author,
            page_count,
            pages,
        } = request;

        let filename = filename.trim().to_string();
        if filename.is_empty() {
            return Err(IngestError::EmptyFilename);
        }
        let document_id = document_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(
            document_id = %document_id,
            filename = %filename,
            pages = pages.len(),
            "Ingesting document"
        );

        let candidates = self.chunker.chunk(&pages);
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_many(&texts).await?
        };
        debug_assert_eq!(candidates.len(), vectors.len());

        let passages: Vec<(Chunk, Vec<f32>)> = candidates
            .into_iter()
            .enumerate()
            .zip(vectors)
            .map(|((position, candidate), vector)| {
                (
                    Chunk {
                        chunk_id: format!("{document_id}#{position}"),
                        document_id: document_id.clone(),
                        page_number: candidate.page_number,
                        text: candidate.text,
                    },
                    vector,
                )
            })
            .collect();
        let chunk_ids: Vec<String> = passages.iter().map(|(c, _)| c.chunk_id.clone()).collect();

        let record = DocumentRecord {
            document_id,
            filename,
            title: title.filter(|value| !value.trim().is_empty()),
            author: author.filter(|value| !value.trim().is_empty()),
            page_count: page_count.unwrap_or(pages.len() as u32),
            upload_time: OffsetDateTime::now_utc(),
            chunk_count: chunk_ids.len(),
            chunk_ids,
        };
        let record = self.registry.register(record, passages)?;
        self.metrics.record_document(record.chunk_count as u64);
        tracing::info!(
            document_id = %record.document_id,
            chunks = record.chunk_count,
            chunk_size = self.chunker.chunk_size(),
            "Document indexed"
        );
        Ok(record)
    }

    /// Remove a document and all of its passages.
    pub fn delete(&self, document_id: &str) -> Result<DocumentRecord, RegistryError> {
        let record = self.registry.remove(document_id)?;
        self.metrics.record_removal();
        Ok(record)
    }
}
