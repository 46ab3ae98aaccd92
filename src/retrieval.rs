//! Query-time retrieval: embed, search, deduplicate, and number citations.

use crate::{
    embedding::{Embedder, EmbeddingError},
    index::{IndexError, ScoredChunk},
    registry::DocumentRegistry,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Candidates fetched per requested source, so deduplication can still fill `top_k`.
const CANDIDATE_MULTIPLIER: usize = 3;
const UNKNOWN_FILENAME: &str = "Unknown";

/// Errors emitted while planning retrieval for a query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Embedding provider failed to return a vector for the query.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Query vector did not fit the stored vectors.
    #[error("Vector search failed: {0}")]
    Index(#[from] IndexError),
}

/// Retrieval result surfaced to the model and the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// 1-based, response-scoped number referenced by `[n]` markers.
    pub citation_id: usize,
    /// Owning document.
    pub document_id: String,
    /// Display filename of the owning document.
    pub filename: String,
    /// 1-based page, when known.
    pub page: Option<u32>,
    /// Full passage text.
    pub excerpt_text: String,
    /// Cosine similarity between query and passage.
    pub similarity_score: f32,
}

/// Tunables for a retrieval pass.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    /// Maximum number of sources returned.
    pub top_k: usize,
    /// Minimum similarity a passage needs to be cited.
    pub min_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.2,
        }
    }
}

/// Turns query text into a ranked, citation-ready list of sources.
pub struct RetrievalPlanner {
    embedder: Arc<dyn Embedder>,
    registry: Arc<DocumentRegistry>,
    settings: RetrievalSettings,
}

impl RetrievalPlanner {
    /// Build a planner over the registry's index.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        registry: Arc<DocumentRegistry>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            registry,
            settings,
        }
    }

    /// Active settings.
    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    /// Plan sources for `query` across every indexed document.
    pub async fn plan(&self, query: &str) -> Result<Vec<Source>, RetrievalError> {
        self.plan_within(query, None).await
    }

    /// Plan sources for `query`, optionally restricted to the listed documents.
    ///
    /// A blank query, an empty index, or no passage above the score floor all produce an empty
    /// list rather than an error.
    pub async fn plan_within(
        &self,
        query: &str,
        document_ids: Option<&[String]>,
    ) -> Result<Vec<Source>, RetrievalError> {
        if query.trim().is_empty() {
            tracing::debug!("Blank query; skipping retrieval");
            return Ok(Vec::new());
        }
        let index = self.registry.index();
        if index.is_empty() {
            tracing::debug!("Index is empty; no sources to plan");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let pool = self.settings.top_k.saturating_mul(CANDIDATE_MULTIPLIER);
        let hits = match document_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                let allowed: HashSet<String> = ids.iter().cloned().collect();
                index.search_documents(&vector, pool, self.settings.min_score, &allowed)?
            }
            None => index.search(&vector, pool, self.settings.min_score)?,
        };

        let sources = self.number_sources(dedupe_by_page(hits));
        tracing::info!(
            sources = sources.len(),
            top_k = self.settings.top_k,
            min_score = self.settings.min_score,
            "Retrieval planned"
        );
        Ok(sources)
    }

    fn number_sources(&self, hits: Vec<ScoredChunk>) -> Vec<Source> {
        hits.into_iter()
            .take(self.settings.top_k)
            .enumerate()
            .map(|(position, hit)| Source {
                citation_id: position + 1,
                filename: self
                    .registry
                    .filename(&hit.chunk.document_id)
                    .unwrap_or_else(|| UNKNOWN_FILENAME.to_string()),
                document_id: hit.chunk.document_id.clone(),
                page: hit.chunk.page_number,
                excerpt_text: hit.chunk.text.clone(),
                similarity_score: hit.score,
            })
            .collect()
    }
}

/// Keep the best-scoring hit per (document, page). Hits arrive sorted, so the first wins.
///
/// Passages without a page number are never merged with each other.
fn dedupe_by_page(hits: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| match hit.chunk.page_number {
            Some(page) => seen.insert((hit.chunk.document_id.clone(), page)),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::HashingEmbedder,
        index::{Chunk, VectorIndex},
        registry::DocumentRecord,
    };
    use async_trait::async_trait;
    use time::OffsetDateTime;

    /// Embeds by looking the text up in a fixed table; unknown text maps to the zero vector.
    struct TableEmbedder(Vec<(&'static str, Vec<f32>)>);

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|text| {
                    self.0
                        .iter()
                        .find(|(key, _)| *key == text.as_str())
                        .map(|(_, vector)| vector.clone())
                        .unwrap_or_else(|| vec![0.0; 3])
                })
                .collect())
        }
    }

    fn register(registry: &DocumentRegistry, id: &str, passages: Vec<(u32, Vec<f32>)>) {
        let chunks: Vec<(Chunk, Vec<f32>)> = passages
            .into_iter()
            .enumerate()
            .map(|(n, (page, vector))| {
                (
                    Chunk {
                        chunk_id: format!("{id}#{n}"),
                        document_id: id.into(),
                        page_number: Some(page),
                        text: format!("{id} page {page} passage {n}"),
                    },
                    vector,
                )
            })
            .collect();
        let record = DocumentRecord {
            document_id: id.into(),
            filename: format!("{id}.pdf"),
            title: None,
            author: None,
            page_count: 3,
            upload_time: OffsetDateTime::now_utc(),
            chunk_ids: chunks.iter().map(|(c, _)| c.chunk_id.clone()).collect(),
            chunk_count: chunks.len(),
        };
        registry.register(record, chunks).unwrap();
    }

    fn planner(
        query_vector: Vec<f32>,
        min_score: f32,
    ) -> (RetrievalPlanner, Arc<DocumentRegistry>) {
        let registry = Arc::new(DocumentRegistry::new(Arc::new(VectorIndex::new())));
        let embedder = Arc::new(TableEmbedder(vec![("query", query_vector)]));
        let planner = RetrievalPlanner::new(
            embedder,
            registry.clone(),
            RetrievalSettings { top_k: 2, min_score },
        );
        (planner, registry)
    }

    #[tokio::test]
    async fn closest_passage_gets_first_citation() {
        let (planner, registry) = planner(vec![0.1, 1.0, 0.0], 0.0);
        register(
            &registry,
            "A",
            vec![(1, vec![1.0, 0.0, 0.0]), (2, vec![0.0, 1.0, 0.0]), (3, vec![0.0, 0.0, 1.0])],
        );
        register(&registry, "B", vec![(1, vec![1.0, 0.2, 0.0])]);

        let sources = planner.plan("query").await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].citation_id, 1);
        assert_eq!(sources[0].document_id, "A");
        assert_eq!(sources[0].page, Some(2));
        assert_eq!(sources[0].filename, "A.pdf");
        assert_eq!(sources[1].citation_id, 2);
    }

    #[tokio::test]
    async fn same_page_hits_collapse_to_the_best() {
        let (planner, registry) = planner(vec![1.0, 0.0, 0.0], 0.0);
        register(
            &registry,
            "A",
            vec![
                (4, vec![1.0, 0.1, 0.0]),
                (4, vec![1.0, 0.0, 0.0]),
                (5, vec![1.0, 0.5, 0.0]),
            ],
        );

        let sources = planner.plan("query").await.unwrap();
        let pages: Vec<Option<u32>> = sources.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec![Some(4), Some(5)]);
        assert_eq!(sources[0].excerpt_text, "A page 4 passage 1");
    }

    #[tokio::test]
    async fn empty_index_and_blank_query_yield_no_sources() {
        let (planner, registry) = planner(vec![1.0, 0.0, 0.0], 0.0);
        assert!(planner.plan("query").await.unwrap().is_empty());

        register(&registry, "A", vec![(1, vec![1.0, 0.0, 0.0])]);
        assert!(planner.plan("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn score_floor_suppresses_irrelevant_matches() {
        let (planner, registry) = planner(vec![1.0, 0.0, 0.0], 0.5);
        register(&registry, "A", vec![(1, vec![0.0, 1.0, 0.0])]);
        assert!(planner.plan("query").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_filter_limits_sources() {
        let (planner, registry) = planner(vec![1.0, 0.0, 0.0], 0.0);
        register(&registry, "A", vec![(1, vec![1.0, 0.0, 0.0])]);
        register(&registry, "B", vec![(1, vec![0.9, 0.1, 0.0])]);

        let only_b = vec!["B".to_string()];
        let sources = planner.plan_within("query", Some(&only_b)).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].document_id, "B");
    }

    #[tokio::test]
    async fn hashing_round_trip_finds_the_only_chunk() {
        let registry = Arc::new(DocumentRegistry::new(Arc::new(VectorIndex::new())));
        let embedder = Arc::new(HashingEmbedder::new(64).unwrap());
        let text = "quarterly revenue grew by twelve percent";
        let vector = embedder.encode(text);
        registry
            .register(
                DocumentRecord {
                    document_id: "A".into(),
                    filename: "a.pdf".into(),
                    title: None,
                    author: None,
                    page_count: 1,
                    upload_time: OffsetDateTime::now_utc(),
                    chunk_ids: vec!["A#0".into()],
                    chunk_count: 1,
                },
                vec![(
                    Chunk {
                        chunk_id: "A#0".into(),
                        document_id: "A".into(),
                        page_number: Some(1),
                        text: text.into(),
                    },
                    vector,
                )],
            )
            .unwrap();
        let planner = RetrievalPlanner::new(embedder, registry, RetrievalSettings::default());

        let sources = planner.plan(text).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert!((sources[0].similarity_score - 1.0).abs() < 1e-5);
    }
}
