//! Core data models used throughout the engine.
//!
//! These types represent the documents, passages, conversations, and turns
//! that flow through the ingestion and conversation pipelines, plus the
//! ephemeral value objects exchanged with the retrieval and generation
//! components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an ingested document.
pub type DocumentId = Uuid;
/// Identifier of a single passage within a document.
pub type PassageId = Uuid;
/// Identifier of a conversation.
pub type ConversationId = Uuid;

/// Where a document's text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceType {
    /// Uploaded file, identified by its original filename.
    Upload { filename: String },
    /// Fetched from a URL.
    Url { url: String },
    /// Raw text submitted directly.
    Text,
}

/// Ingestion status of a document.
///
/// Transitions move only forward: `Pending → Chunking → Embedding → Indexed`,
/// with `Failed` reachable from any non-terminal state. `Indexed` and
/// `Failed` are terminal — a failed document is never retried in place;
/// re-ingestion creates a fresh document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Pending,
    Chunking,
    Embedding,
    Indexed,
    Failed,
}

impl IngestStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, IngestStatus::Indexed | IngestStatus::Failed)
    }

    /// Whether a transition from `self` to `next` respects the forward-only
    /// state machine.
    pub fn can_advance_to(self, next: IngestStatus) -> bool {
        use IngestStatus::*;
        match (self, next) {
            (Pending, Chunking) | (Chunking, Embedding) | (Embedding, Indexed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// An ingested document and its pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Owner the document belongs to; retrieval never crosses owners.
    pub owner_id: String,
    pub source: SourceType,
    pub status: IngestStatus,
    /// Failure detail, set when `status` is `Failed`.
    pub error: Option<String>,
    /// Number of passages produced, set once chunking has run.
    pub chunk_count: usize,
    /// SHA-256 of the submitted text; two ingestions of identical text
    /// share a hash even though they are distinct documents.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Byte span of a passage within its source document.
///
/// Offsets are byte indices into the original text and always fall on UTF-8
/// character boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A contiguous slice of a document: the unit of embedding and retrieval.
///
/// Passages are immutable once created. Re-ingesting changed text produces a
/// new document with new passages rather than mutating these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub document_id: DocumentId,
    /// Ordinal position within the document, starting at 0.
    pub position: usize,
    pub text: String,
    pub span: Span,
}

/// The metadata stored alongside a passage's vector in the index.
///
/// Carries enough to rank, scope, and cite a search hit without a second
/// lookup: the owning document, the owner for tenant isolation, and the
/// passage text itself as the retrievable payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub passage_id: PassageId,
    pub document_id: DocumentId,
    pub owner_id: String,
    pub position: usize,
    pub text: String,
}

impl Passage {
    /// The index payload for this passage.
    pub fn metadata(&self, owner_id: &str) -> PassageMetadata {
        PassageMetadata {
            passage_id: self.id,
            document_id: self.document_id,
            owner_id: owner_id.to_string(),
            position: self.position,
            text: self.text.clone(),
        }
    }
}

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Token-usage counters reported by a generation provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One message within a conversation. Immutable once appended; append order
/// is the only ordering guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Passages the assistant's answer drew on. Empty for user turns and for
    /// assistant turns generated without retrieved context.
    #[serde(default)]
    pub cited_passages: Vec<PassageId>,
    /// Provider-reported usage, present on assistant turns.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// A user turn with the given content.
    pub fn user(content: impl Into<String>) -> Self {
        Turn {
            role: Role::User,
            content: content.into(),
            cited_passages: Vec::new(),
            usage: None,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn carrying citations and usage counters.
    pub fn assistant(
        content: impl Into<String>,
        cited_passages: Vec<PassageId>,
        usage: TokenUsage,
    ) -> Self {
        Turn {
            role: Role::Assistant,
            content: content.into(),
            cited_passages,
            usage: Some(usage),
            created_at: Utc::now(),
        }
    }
}

/// A conversation record. The turn sequence itself lives in the
/// conversation store and is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: String,
    /// Optional per-conversation override of the default system prompt.
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// A fresh conversation owned by `owner_id`.
    pub fn new(owner_id: impl Into<String>, system_prompt: Option<String>) -> Self {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            system_prompt,
            created_at: now,
            last_activity: now,
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub meta: PassageMetadata,
    /// Similarity in `[0.0, 1.0]`.
    pub score: f32,
}

/// Ranked, deduplicated passages for one query. Ephemeral — never persisted.
///
/// Passages are sorted by descending score (ties broken by ascending passage
/// id) and contain at most the configured number of passages per source
/// document. An empty result is the normal "no relevant context" outcome,
/// not an error.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

/// A chat message inside a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// The assembled prompt handed to a generation provider. Ephemeral.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System prompt, including any retrieved-context block.
    pub system: String,
    /// Conversation memory plus the current user turn, oldest first.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A completed generation. Ephemeral.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    /// Name of the provider that produced the response.
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    /// Providers attempted, in order, including the successful one. Filled
    /// in by the router.
    pub attempted: Vec<String>,
}

/// The result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub user_turn: Turn,
    pub assistant_turn: Turn,
    /// Name of the provider that produced the answer.
    pub provider: String,
    /// Providers attempted before (and including) the successful one.
    pub attempted: Vec<String>,
    pub usage: TokenUsage,
    /// False when the response was generated but the conversation store
    /// failed to record the turns. The answer is still valid; the memory of
    /// it is not durable.
    pub memory_persisted: bool,
}
