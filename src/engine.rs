//! Conversation orchestration.
//!
//! [`Engine`] is the top-level entry point: it owns the shared collaborators
//! (embedder, vector index, stores, provider router) and drives each user
//! turn through retrieve → assemble → generate → persist.
//!
//! Concurrency model: turns within one conversation are strictly serialized
//! by a per-conversation async mutex, so memory append order always equals
//! request arrival order. Turns across different conversations run fully
//! concurrently — no lock is shared between conversations, and no
//! conversation's lock is held across another conversation's awaits.
//!
//! Cancellation: dropping a `submit_turn` future (client disconnect) aborts
//! the in-flight provider call, releases the conversation lock, and appends
//! nothing. The end-to-end turn timeout covers retrieval, assembly, and
//! generation; persistence happens after the deadline check so a generated
//! answer is never thrown away by the clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::assemble::assemble;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::index::VectorIndex;
use crate::models::{
    Conversation, ConversationId, Document, DocumentId, GenerationResponse, RetrievalResult,
    SourceType, Turn, TurnOutcome,
};
use crate::pipeline::DocumentPipeline;
use crate::retrieve::Retriever;
use crate::router::ProviderRouter;
use crate::store::{ConversationStore, DocumentStore};

/// The retrieval-augmented conversation engine.
pub struct Engine {
    config: Config,
    conversations: Arc<dyn ConversationStore>,
    documents: Arc<dyn DocumentStore>,
    pipeline: DocumentPipeline,
    retriever: Retriever,
    router: ProviderRouter,
    /// One lock per conversation, created on first use. Guards turn
    /// ordering only; never held while another conversation works.
    turn_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    /// Wire an engine from injected collaborators.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentStore>,
        conversations: Arc<dyn ConversationStore>,
        router: ProviderRouter,
    ) -> Self {
        let pipeline = DocumentPipeline::new(
            documents.clone(),
            index.clone(),
            embedder.clone(),
            config.chunking.clone(),
        );
        let retriever = Retriever::new(embedder, index, config.retrieval.clone());
        Self {
            config,
            conversations,
            documents,
            pipeline,
            retriever,
            router,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire an engine entirely from configuration: HTTP embedding and chat
    /// providers, in-memory index and stores.
    ///
    /// Deployments with an external vector database or durable stores use
    /// [`Engine::new`] with their own collaborators instead.
    pub fn from_config(config: Config) -> EngineResult<Self> {
        let embedder = Arc::new(crate::embedding::HttpEmbedder::new(&config.embedding)?);
        let router = ProviderRouter::from_config(&config.generation)?;
        Ok(Self::new(
            config,
            embedder,
            Arc::new(crate::index::InMemoryIndex::new()),
            Arc::new(crate::store::InMemoryDocumentStore::new()),
            Arc::new(crate::store::InMemoryConversationStore::new()),
            router,
        ))
    }

    // ------------------------------------------------------------------
    // Document operations
    // ------------------------------------------------------------------

    /// Ingest a document for `owner_id` and run the pipeline to its
    /// terminal state. Ingestion failures are reported via the returned
    /// document's status.
    pub async fn ingest_document(
        &self,
        owner_id: &str,
        text: &str,
        source: SourceType,
    ) -> EngineResult<Document> {
        self.pipeline.ingest(owner_id, text, source).await
    }

    /// Delete a document and its indexed passages.
    pub async fn delete_document(
        &self,
        document_id: DocumentId,
        owner_id: &str,
    ) -> EngineResult<()> {
        self.pipeline.delete(document_id, owner_id).await
    }

    /// Look up a document record.
    pub async fn document(&self, id: DocumentId) -> EngineResult<Option<Document>> {
        self.documents.get(id).await
    }

    /// All documents owned by `owner_id`, newest first.
    pub async fn documents_for_owner(&self, owner_id: &str) -> EngineResult<Vec<Document>> {
        self.documents.documents_for_owner(owner_id).await
    }

    // ------------------------------------------------------------------
    // Conversation operations
    // ------------------------------------------------------------------

    /// Create a conversation owned by `owner_id`.
    pub async fn create_conversation(
        &self,
        owner_id: &str,
        system_prompt: Option<String>,
    ) -> EngineResult<Conversation> {
        let conversation = Conversation::new(owner_id, system_prompt);
        self.conversations.create(conversation.clone()).await?;
        Ok(conversation)
    }

    /// Turn history of a conversation, in append order.
    pub async fn history(
        &self,
        conversation_id: ConversationId,
        owner_id: &str,
    ) -> EngineResult<Vec<Turn>> {
        let _ = self.authorized(conversation_id, owner_id).await?;
        self.conversations.history(conversation_id).await
    }

    /// Process one user turn and return the completed exchange.
    pub async fn submit_turn(
        &self,
        conversation_id: ConversationId,
        owner_id: &str,
        text: &str,
    ) -> EngineResult<TurnOutcome> {
        self.run_turn(conversation_id, owner_id, text, None).await
    }

    /// Process one user turn, streaming answer fragments through `tokens`
    /// as they arrive. The channel closes when the turn finishes; the
    /// returned outcome carries the complete answer either way.
    pub async fn submit_turn_streaming(
        &self,
        conversation_id: ConversationId,
        owner_id: &str,
        text: &str,
        tokens: mpsc::Sender<String>,
    ) -> EngineResult<TurnOutcome> {
        self.run_turn(conversation_id, owner_id, text, Some(tokens))
            .await
    }

    async fn run_turn(
        &self,
        conversation_id: ConversationId,
        owner_id: &str,
        text: &str,
        tokens: Option<mpsc::Sender<String>>,
    ) -> EngineResult<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("turn text is empty".into()));
        }

        // Serialize turns within this conversation. The guard lives until
        // the turn (including persistence) completes or is cancelled.
        let lock = self.turn_lock(conversation_id);
        let _guard = lock.lock().await;

        let conversation = self.ensure_conversation(conversation_id, owner_id).await?;
        let history = self.conversations.history(conversation_id).await?;

        let deadline = Duration::from_secs(self.config.generation.turn_timeout_secs);
        let (response, cited_passages) = tokio::time::timeout(
            deadline,
            self.retrieve_and_generate(&conversation, &history, text, tokens),
        )
        .await
        .map_err(|_| EngineError::TurnTimeout(deadline))??;

        // Persist both turns together, still under the lock. Losing the
        // write must not hide a successful generation from the caller.
        let user_turn = Turn::user(text);
        let assistant_turn =
            Turn::assistant(response.content.clone(), cited_passages, response.usage);
        let memory_persisted = match self
            .conversations
            .append_turns(
                conversation_id,
                vec![user_turn.clone(), assistant_turn.clone()],
            )
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(conversation = %conversation_id, %err, "turn memory not persisted");
                false
            }
        };

        info!(
            conversation = %conversation_id,
            provider = %response.provider,
            persisted = memory_persisted,
            "turn complete"
        );
        Ok(TurnOutcome {
            conversation_id,
            user_turn,
            assistant_turn,
            provider: response.provider.clone(),
            attempted: response.attempted.clone(),
            usage: response.usage,
            memory_persisted,
        })
    }

    /// The timed section of a turn: retrieval, assembly, and generation.
    async fn retrieve_and_generate(
        &self,
        conversation: &Conversation,
        history: &[Turn],
        text: &str,
        tokens: Option<mpsc::Sender<String>>,
    ) -> EngineResult<(GenerationResponse, Vec<crate::models::PassageId>)> {
        // An empty retrieval is the normal "no relevant context" outcome;
        // the turn proceeds without passages. Index failures surface.
        let retrieval: RetrievalResult =
            self.retriever.retrieve(text, &conversation.owner_id).await?;

        let assembled = assemble(
            history,
            &retrieval,
            text,
            conversation.system_prompt.as_deref(),
            &self.config.context,
            &self.config.generation,
        );

        let response = match tokens {
            Some(tx) => self.router.generate_stream(&assembled.request, tx).await?,
            None => self.router.generate(&assembled.request).await?,
        };
        Ok((response, assembled.cited_passages))
    }

    /// Fetch the conversation, creating it on first use; reject callers
    /// that do not own it.
    async fn ensure_conversation(
        &self,
        conversation_id: ConversationId,
        owner_id: &str,
    ) -> EngineResult<Conversation> {
        match self.conversations.get(conversation_id).await? {
            Some(conversation) if conversation.owner_id == owner_id => Ok(conversation),
            Some(_) => Err(EngineError::not_found(format!(
                "conversation {conversation_id}"
            ))),
            None => {
                let mut conversation = Conversation::new(owner_id, None);
                conversation.id = conversation_id;
                self.conversations.create(conversation.clone()).await?;
                Ok(conversation)
            }
        }
    }

    async fn authorized(
        &self,
        conversation_id: ConversationId,
        owner_id: &str,
    ) -> EngineResult<Conversation> {
        self.conversations
            .get(conversation_id)
            .await?
            .filter(|c| c.owner_id == owner_id)
            .ok_or_else(|| EngineError::not_found(format!("conversation {conversation_id}")))
    }

    fn turn_lock(&self, conversation_id: ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
