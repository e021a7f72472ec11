//! Vector index abstraction and the in-memory implementation.
//!
//! The [`VectorIndex`] trait is the write/read seam for passage vectors:
//! idempotent upsert, cascade deletion by document, and owner-scoped
//! k-nearest-neighbour search with a score threshold. Production deployments
//! back it with an external vector database; [`InMemoryIndex`] is the
//! reference implementation used in tests and single-process setups, doing
//! brute-force cosine similarity over all stored vectors.
//!
//! A failed search surfaces as [`EngineError::IndexUnavailable`] — callers
//! must never treat a failure as "no matches".

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::similarity_score;
use crate::error::{EngineError, EngineResult};
use crate::models::{DocumentId, PassageId, PassageMetadata};

/// Storage for passage vectors plus their retrieval metadata.
///
/// Implementations must be `Send + Sync`; the index is shared across all
/// conversations and documents without external synchronization.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace passages. Idempotent by passage id: re-upserting
    /// the same passage never duplicates it.
    async fn upsert(&self, entries: Vec<(PassageMetadata, Vec<f32>)>) -> EngineResult<()>;

    /// Remove every passage of a document. No-op if none exist.
    async fn delete_by_document(&self, document_id: DocumentId) -> EngineResult<()>;

    /// Return up to `k` of `owner_id`'s passages with similarity ≥
    /// `min_score`, ordered by descending score, ties broken by ascending
    /// passage id for determinism.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        owner_id: &str,
    ) -> EngineResult<Vec<(PassageMetadata, f32)>>;
}

/// Brute-force in-memory index for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<HashMap<PassageId, (PassageMetadata, Vec<f32>)>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored passages (test hook).
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, batch: Vec<(PassageMetadata, Vec<f32>)>) -> EngineResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| EngineError::IndexUnavailable("index lock poisoned".into()))?;
        for (meta, vector) in batch {
            entries.insert(meta.passage_id, (meta, vector));
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> EngineResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| EngineError::IndexUnavailable("index lock poisoned".into()))?;
        entries.retain(|_, (meta, _)| meta.document_id != document_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        owner_id: &str,
    ) -> EngineResult<Vec<(PassageMetadata, f32)>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| EngineError::IndexUnavailable("index lock poisoned".into()))?;

        let mut hits: Vec<(PassageMetadata, f32)> = entries
            .values()
            .filter(|(meta, _)| meta.owner_id == owner_id)
            .filter_map(|(meta, vector)| {
                let score = similarity_score(query, vector);
                (score >= min_score).then(|| (meta.clone(), score))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.passage_id.cmp(&b.0.passage_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn meta(owner: &str, document_id: DocumentId, position: usize) -> PassageMetadata {
        PassageMetadata {
            passage_id: Uuid::new_v4(),
            document_id,
            owner_id: owner.to_string(),
            position,
            text: format!("passage {position}"),
        }
    }

    #[tokio::test]
    async fn test_upsert_then_search_returns_all() {
        let index = InMemoryIndex::new();
        let doc = Uuid::new_v4();
        let entries: Vec<_> = (0..4)
            .map(|i| (meta("alice", doc, i), vec![1.0, i as f32]))
            .collect();
        index.upsert(entries).await.unwrap();

        let hits = index.search(&[1.0, 0.5], 10, 0.0, "alice").await.unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[tokio::test]
    async fn test_reupsert_does_not_duplicate() {
        let index = InMemoryIndex::new();
        let doc = Uuid::new_v4();
        let entries: Vec<_> = (0..3)
            .map(|i| (meta("alice", doc, i), vec![1.0, i as f32]))
            .collect();
        index.upsert(entries.clone()).await.unwrap();
        index.upsert(entries).await.unwrap();
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_by_document_is_idempotent() {
        let index = InMemoryIndex::new();
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        index
            .upsert(vec![
                (meta("alice", keep, 0), vec![1.0, 0.0]),
                (meta("alice", drop, 0), vec![0.0, 1.0]),
                (meta("alice", drop, 1), vec![0.5, 0.5]),
            ])
            .await
            .unwrap();

        index.delete_by_document(drop).await.unwrap();
        assert_eq!(index.len(), 1);

        // Second delete finds nothing and succeeds.
        index.delete_by_document(drop).await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_search_respects_min_score() {
        let index = InMemoryIndex::new();
        let doc = Uuid::new_v4();
        index
            .upsert(vec![
                (meta("alice", doc, 0), vec![1.0, 0.0]),
                (meta("alice", doc, 1), vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, 0.9, "alice").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.position, 0);
    }

    #[tokio::test]
    async fn test_search_scoped_to_owner() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                (meta("alice", Uuid::new_v4(), 0), vec![1.0, 0.0]),
                (meta("bob", Uuid::new_v4(), 0), vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, 0.0, "alice").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.owner_id, "alice");
    }

    #[tokio::test]
    async fn test_ties_break_by_ascending_passage_id() {
        let index = InMemoryIndex::new();
        let doc = Uuid::new_v4();
        let a = meta("alice", doc, 0);
        let b = meta("alice", doc, 1);
        let first_id = a.passage_id.min(b.passage_id);
        index
            .upsert(vec![(a, vec![1.0, 0.0]), (b, vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, 0.0, "alice").await.unwrap();
        assert_eq!(hits[0].0.passage_id, first_id);
    }

    #[tokio::test]
    async fn test_truncates_to_k() {
        let index = InMemoryIndex::new();
        let doc = Uuid::new_v4();
        let entries: Vec<_> = (0..10)
            .map(|i| (meta("alice", doc, i), vec![1.0, i as f32 * 0.1]))
            .collect();
        index.upsert(entries).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 3, 0.0, "alice").await.unwrap();
        assert_eq!(hits.len(), 3);
    }
}
