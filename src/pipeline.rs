//! Document ingestion pipeline.
//!
//! Drives one document through `Pending → Chunking → Embedding → Indexed`,
//! persisting every transition through the document store so ingestion
//! progress is observable. `Failed` is reachable from any non-terminal
//! state and is terminal: a failed document is never retried in place —
//! re-submission creates a fresh document.
//!
//! Indexing is all-or-nothing. If any chunk fails to embed or upsert, the
//! pipeline deletes whatever did reach the index and fails the whole
//! document, so a partially indexed document can never serve stale partial
//! context.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::index::VectorIndex;
use crate::models::{Document, DocumentId, IngestStatus, SourceType};
use crate::store::DocumentStore;

/// Orchestrates extraction → chunking → embedding → indexing for documents.
pub struct DocumentPipeline {
    documents: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl DocumentPipeline {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            documents,
            index,
            embedder,
            chunking,
        }
    }

    /// Ingest `text` as a new document owned by `owner_id` and run the
    /// pipeline to its terminal state.
    ///
    /// Pipeline failures are reported through the returned document's
    /// status, not as errors; only a broken document store makes this
    /// fallible.
    pub async fn ingest(
        &self,
        owner_id: &str,
        text: &str,
        source: SourceType,
    ) -> EngineResult<Document> {
        let document = Document {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            source,
            status: IngestStatus::Pending,
            error: None,
            chunk_count: 0,
            content_hash: content_hash(text),
            created_at: Utc::now(),
        };
        let id = document.id;
        self.documents.insert(document).await?;

        // Chunking.
        self.advance(id, IngestStatus::Chunking, None).await?;
        let passages = chunk_document(id, text, &self.chunking);
        if passages.is_empty() {
            return self
                .fail(id, "empty document: chunking produced no passages")
                .await;
        }
        let chunk_count = passages.len();
        self.advance(id, IngestStatus::Embedding, Some(chunk_count))
            .await?;

        // Embedding. The embedder batches internally; one failed chunk
        // fails them all.
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(err) => return self.roll_back(id, &format!("embedding failed: {err}")).await,
        };
        if vectors.len() != passages.len() {
            return self
                .roll_back(id, "embedding failed: vector count mismatch")
                .await;
        }

        // Indexing.
        let entries = passages
            .iter()
            .zip(vectors)
            .map(|(passage, vector)| (passage.metadata(owner_id), vector))
            .collect();
        if let Err(err) = self.index.upsert(entries).await {
            return self.roll_back(id, &format!("indexing failed: {err}")).await;
        }

        self.advance(id, IngestStatus::Indexed, None).await?;
        info!(document = %id, chunks = chunk_count, "document indexed");
        self.require(id).await
    }

    /// Delete a document and cascade to its passages in the index.
    ///
    /// The index is cleared before the record is removed; if the index is
    /// unreachable the record survives, so the passages can still be found
    /// and removed by a later delete.
    pub async fn delete(&self, document_id: DocumentId, owner_id: &str) -> EngineResult<()> {
        let document = self
            .documents
            .get(document_id)
            .await?
            .filter(|d| d.owner_id == owner_id)
            .ok_or_else(|| EngineError::not_found(format!("document {document_id}")))?;

        self.index.delete_by_document(document.id).await?;
        self.documents.remove(document.id).await?;
        info!(document = %document_id, "document deleted");
        Ok(())
    }

    async fn advance(
        &self,
        id: DocumentId,
        status: IngestStatus,
        chunk_count: Option<usize>,
    ) -> EngineResult<()> {
        self.documents
            .update_status(id, status, None, chunk_count)
            .await
    }

    /// Remove any partially indexed passages, then mark the document failed.
    async fn roll_back(&self, id: DocumentId, reason: &str) -> EngineResult<Document> {
        if let Err(err) = self.index.delete_by_document(id).await {
            warn!(document = %id, %err, "rollback could not clear the index");
        }
        self.fail(id, reason).await
    }

    async fn fail(&self, id: DocumentId, reason: &str) -> EngineResult<Document> {
        warn!(document = %id, reason, "ingestion failed");
        self.documents
            .update_status(id, IngestStatus::Failed, Some(reason.to_string()), None)
            .await?;
        self.require(id).await
    }

    async fn require(&self, id: DocumentId) -> EngineResult<Document> {
        self.documents
            .get(id)
            .await?
            .ok_or_else(|| EngineError::storage(format!("document {id} vanished mid-pipeline")))
    }
}

/// SHA-256 of the submitted text, hex-encoded.
fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
