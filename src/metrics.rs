use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and chat activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    documents_removed: AtomicU64,
    chats_started: AtomicU64,
    chats_failed: AtomicU64,
    chats_cancelled: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document and the number of chunks produced for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document deletion.
    pub fn record_removal(&self) {
        self.documents_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the start of a chat pipeline.
    pub fn record_chat_started(&self) {
        self.chats_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chat pipeline that ended with an `error` event.
    pub fn record_chat_failed(&self) {
        self.chats_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chat pipeline abandoned by its client.
    pub fn record_chat_cancelled(&self) {
        self.chats_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            documents_removed: self.documents_removed.load(Ordering::Relaxed),
            chats_started: self.chats_started.load(Ordering::Relaxed),
            chats_failed: self.chats_failed.load(Ordering::Relaxed),
            chats_cancelled: self.chats_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents ingested since startup.
    pub documents_indexed: u64,
    /// Total chunk count produced across all ingested documents.
    pub chunks_indexed: u64,
    /// Number of documents deleted since startup.
    pub documents_removed: u64,
    /// Chat pipelines started.
    pub chats_started: u64,
    /// Chat pipelines that terminated with an error.
    pub chats_failed: u64,
    /// Chat pipelines whose client disconnected mid-stream.
    pub chats_cancelled: u64,
}
