//! # Ragline
//!
//! A retrieval-augmented conversation engine.
//!
//! Ragline ingests documents into a searchable vector index, retrieves
//! relevant passages for user queries, and orchestrates multi-turn
//! conversations against multiple generation backends while maintaining
//! per-conversation memory under concurrent multi-user load.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Documents │──▶│   Pipeline    │──▶│ VectorIndex │
//! │ text/url/… │   │ Chunk+Embed  │   │  (upsert)   │
//! └────────────┘   └──────────────┘   └──────┬──────┘
//!                                            │ search
//!                  ┌──────────────┐   ┌──────▼──────┐
//!  user turn ─────▶│    Engine     │──▶│  Retriever  │
//!                  │ lock · timeout│   └─────────────┘
//!                  │ retrieve      │   ┌─────────────┐
//!                  │ assemble      │──▶│   Router    │──▶ providers
//!                  │ generate      │   └─────────────┘
//!                  │ persist       │   ┌─────────────┐
//!                  └──────┬────────┘──▶│   Stores    │
//!                         ▼            └─────────────┘
//!                  assistant turn (+ streamed tokens)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Engine error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Boundary-aware overlapping text chunking |
//! | [`embedding`] | Embedding client abstraction and HTTP implementation |
//! | [`index`] | Vector index abstraction and in-memory implementation |
//! | [`store`] | Document/conversation persistence seams |
//! | [`pipeline`] | Document ingestion state machine |
//! | [`retrieve`] | Owner-scoped similarity retrieval |
//! | [`assemble`] | Token-budgeted prompt context assembly |
//! | [`provider`] | Generation provider abstraction and HTTP implementation |
//! | [`router`] | Ordered-fallback provider routing |
//! | [`engine`] | Conversation orchestration |

pub mod assemble;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod retrieve;
pub mod router;
pub mod store;

pub use config::{load_config, Config};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use models::{
    Conversation, ConversationId, Document, DocumentId, IngestStatus, Passage, PassageId,
    RetrievalResult, Role, SourceType, Turn, TurnOutcome,
};
