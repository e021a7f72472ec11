//! Owner-scoped similarity retrieval.
//!
//! The retriever embeds a query, searches the vector index within the
//! caller's owned documents, and reduces the ranked candidates to at most
//! `top_k` passages with at most `max_passages_per_document` from any one
//! source document. The score threshold is applied by the index before the
//! per-document cap — the deterministic cap-after-filter ordering.
//!
//! Returning an empty [`RetrievalResult`] is the normal "no relevant
//! context" outcome, not an error; index or embedding failures surface as
//! errors instead of pretending there were no matches.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::EngineResult;
use crate::index::VectorIndex;
use crate::models::{DocumentId, RetrievalResult, ScoredPassage};

/// Retrieves ranked, deduplicated passages for a query.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Retrieve context passages for `query`, scoped to `owner_id`'s
    /// documents.
    pub async fn retrieve(&self, query: &str, owner_id: &str) -> EngineResult<RetrievalResult> {
        if query.trim().is_empty() {
            return Ok(RetrievalResult::default());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let candidates = self
            .index
            .search(
                &query_vec,
                self.config.candidate_k.max(self.config.top_k),
                self.config.min_score,
                owner_id,
            )
            .await?;

        let result = dedup_by_document(
            candidates,
            self.config.top_k,
            self.config.max_passages_per_document,
        );
        debug!(
            owner_id,
            results = result.len(),
            "retrieval complete"
        );
        Ok(result)
    }
}

/// Walk ranked candidates keeping at most `per_document` passages from any
/// one document, until `top_k` results are collected or the pool runs out.
fn dedup_by_document(
    candidates: Vec<(crate::models::PassageMetadata, f32)>,
    top_k: usize,
    per_document: usize,
) -> RetrievalResult {
    let mut per_doc: HashMap<DocumentId, usize> = HashMap::new();
    let mut passages = Vec::new();

    for (meta, score) in candidates {
        if passages.len() >= top_k {
            break;
        }
        let seen = per_doc.entry(meta.document_id).or_insert(0);
        if *seen >= per_document {
            continue;
        }
        *seen += 1;
        passages.push(ScoredPassage { meta, score });
    }

    RetrievalResult { passages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassageMetadata;
    use uuid::Uuid;

    fn candidate(document_id: DocumentId, score: f32) -> (PassageMetadata, f32) {
        (
            PassageMetadata {
                passage_id: Uuid::new_v4(),
                document_id,
                owner_id: "alice".into(),
                position: 0,
                text: "text".into(),
            },
            score,
        )
    }

    #[test]
    fn test_dedup_keeps_best_per_document() {
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();
        // Ranked input: two hits from `doc`, one from `other`.
        let candidates = vec![
            candidate(doc, 0.95),
            candidate(doc, 0.90),
            candidate(other, 0.85),
        ];
        let result = dedup_by_document(candidates, 5, 1);
        assert_eq!(result.len(), 2);
        assert!((result.passages[0].score - 0.95).abs() < 1e-6);
        assert_eq!(result.passages[1].meta.document_id, other);
    }

    #[test]
    fn test_dedup_respects_per_document_cap_above_one() {
        let doc = Uuid::new_v4();
        let candidates = vec![
            candidate(doc, 0.9),
            candidate(doc, 0.8),
            candidate(doc, 0.7),
        ];
        let result = dedup_by_document(candidates, 5, 2);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_dedup_stops_at_top_k() {
        let candidates: Vec<_> = (0..10)
            .map(|i| candidate(Uuid::new_v4(), 1.0 - i as f32 * 0.05))
            .collect();
        let result = dedup_by_document(candidates, 3, 1);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_dedup_empty_pool() {
        let result = dedup_by_document(Vec::new(), 5, 1);
        assert!(result.is_empty());
    }
}
