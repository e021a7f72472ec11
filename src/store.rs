//! Persistence-boundary traits and in-memory implementations.
//!
//! Durable storage of documents and conversations is owned by an external
//! collaborator; the engine only needs the operations below. The in-memory
//! implementations back tests and single-process deployments, using the
//! same `RwLock`-over-maps shape as the in-memory vector index.
//!
//! The document store enforces the forward-only ingestion state machine: a
//! status update that moves backwards (or out of a terminal state) is
//! rejected as a storage error rather than silently applied.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{EngineError, EngineResult};
use crate::models::{Conversation, ConversationId, Document, DocumentId, IngestStatus, Turn};

/// Durable records of documents and their ingestion status.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document record.
    async fn insert(&self, document: Document) -> EngineResult<()>;

    /// Advance a document's status. `error` is recorded for `Failed`;
    /// `chunk_count` is recorded once chunking has produced passages.
    async fn update_status(
        &self,
        id: DocumentId,
        status: IngestStatus,
        error: Option<String>,
        chunk_count: Option<usize>,
    ) -> EngineResult<()>;

    async fn get(&self, id: DocumentId) -> EngineResult<Option<Document>>;

    /// Remove a document record entirely.
    async fn remove(&self, id: DocumentId) -> EngineResult<()>;

    /// All documents owned by `owner_id`, newest first.
    async fn documents_for_owner(&self, owner_id: &str) -> EngineResult<Vec<Document>>;
}

/// Durable records of conversations and their append-only turn sequences.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a new conversation with no turns.
    async fn create(&self, conversation: Conversation) -> EngineResult<()>;

    async fn get(&self, id: ConversationId) -> EngineResult<Option<Conversation>>;

    /// Append turns in order and bump the conversation's last-activity
    /// timestamp. Turns are immutable once appended.
    async fn append_turns(&self, id: ConversationId, turns: Vec<Turn>) -> EngineResult<()>;

    /// Full turn history in append order.
    async fn history(&self, id: ConversationId) -> EngineResult<Vec<Turn>>;
}

/// In-memory document store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document: Document) -> EngineResult<()> {
        let mut documents = lock_write(&self.documents)?;
        documents.insert(document.id, document);
        Ok(())
    }

    async fn update_status(
        &self,
        id: DocumentId,
        status: IngestStatus,
        error: Option<String>,
        chunk_count: Option<usize>,
    ) -> EngineResult<()> {
        let mut documents = lock_write(&self.documents)?;
        let document = documents
            .get_mut(&id)
            .ok_or_else(|| EngineError::storage(format!("unknown document {id}")))?;

        if !document.status.can_advance_to(status) {
            return Err(EngineError::storage(format!(
                "illegal status transition {:?} -> {:?} for document {id}",
                document.status, status
            )));
        }

        document.status = status;
        document.error = error;
        if let Some(count) = chunk_count {
            document.chunk_count = count;
        }
        Ok(())
    }

    async fn get(&self, id: DocumentId) -> EngineResult<Option<Document>> {
        Ok(lock_read(&self.documents)?.get(&id).cloned())
    }

    async fn remove(&self, id: DocumentId) -> EngineResult<()> {
        lock_write(&self.documents)?.remove(&id);
        Ok(())
    }

    async fn documents_for_owner(&self, owner_id: &str) -> EngineResult<Vec<Document>> {
        let documents = lock_read(&self.documents)?;
        let mut owned: Vec<Document> = documents
            .values()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}

struct ConversationEntry {
    conversation: Conversation,
    turns: Vec<Turn>,
}

/// In-memory conversation store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, ConversationEntry>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, conversation: Conversation) -> EngineResult<()> {
        let mut conversations = lock_write(&self.conversations)?;
        conversations.insert(
            conversation.id,
            ConversationEntry {
                conversation,
                turns: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: ConversationId) -> EngineResult<Option<Conversation>> {
        Ok(lock_read(&self.conversations)?
            .get(&id)
            .map(|entry| entry.conversation.clone()))
    }

    async fn append_turns(&self, id: ConversationId, turns: Vec<Turn>) -> EngineResult<()> {
        let mut conversations = lock_write(&self.conversations)?;
        let entry = conversations
            .get_mut(&id)
            .ok_or_else(|| EngineError::storage(format!("unknown conversation {id}")))?;
        entry.turns.extend(turns);
        entry.conversation.last_activity = Utc::now();
        Ok(())
    }

    async fn history(&self, id: ConversationId) -> EngineResult<Vec<Turn>> {
        Ok(lock_read(&self.conversations)?
            .get(&id)
            .map(|entry| entry.turns.clone())
            .unwrap_or_default())
    }
}

fn lock_read<T>(lock: &RwLock<T>) -> EngineResult<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| EngineError::storage("store lock poisoned"))
}

fn lock_write<T>(lock: &RwLock<T>) -> EngineResult<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| EngineError::storage("store lock poisoned"))
}
