//! Engine error taxonomy.
//!
//! Every fallible engine operation returns [`EngineError`]. The variants map
//! one-to-one onto the failure classes the collaborating clients can report:
//! transient network trouble, provider-side auth/quota rejection, content
//! policy refusal, index connectivity loss, provider-chain exhaustion, and
//! the per-turn deadline. Callers use [`EngineError::is_retryable`] to decide
//! whether resubmitting the same request can help.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network failure or timeout talking to an external collaborator.
    /// The owning client retries these with backoff before surfacing them;
    /// once surfaced, resubmission may still succeed.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Authentication, quota, or request rejection reported by a provider.
    /// Not retried automatically — resubmitting the same request will fail
    /// the same way until configuration changes.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider refused the request on content-policy grounds. Never
    /// retried against another provider: a policy refusal does not improve
    /// by switching vendors.
    #[error("content rejected: {0}")]
    ContentRejected(String),

    /// The vector index could not be reached. Ingestion and retrieval fail
    /// closed on this — a failed search is never reported as "no matches".
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Every configured provider failed with a retryable error or timed out.
    #[error("all providers unavailable (attempted: {})", attempted.join(", "))]
    AllProvidersUnavailable {
        /// Provider names in the order they were attempted.
        attempted: Vec<String>,
    },

    /// The end-to-end turn budget (retrieval + assembly + generation)
    /// elapsed before a response was produced.
    #[error("turn timed out after {0:?}")]
    TurnTimeout(Duration),

    /// A referenced conversation or document does not exist, or is not owned
    /// by the caller. Ownership mismatches deliberately report the same way
    /// as missing records.
    #[error("not found: {0}")]
    NotFound(String),

    /// The persistence collaborator failed. Fatal for reads and record
    /// creation; non-fatal for post-generation memory writes, where the
    /// engine reports the response anyway with `memory_persisted = false`.
    #[error("storage error: {0}")]
    Storage(String),

    /// A request was malformed before any external call was made.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Whether resubmitting the same request is worthwhile.
    ///
    /// Transient failures, turn timeouts, and index connectivity loss can
    /// clear on their own. Content rejections, provider auth/quota errors,
    /// and an exhausted provider chain will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transient(_)
                | EngineError::TurnTimeout(_)
                | EngineError::IndexUnavailable(_)
        )
    }

    /// Shorthand constructor for [`EngineError::Transient`].
    pub fn transient(msg: impl Into<String>) -> Self {
        EngineError::Transient(msg.into())
    }

    /// Shorthand constructor for [`EngineError::Provider`].
    pub fn provider(msg: impl Into<String>) -> Self {
        EngineError::Provider(msg.into())
    }

    /// Shorthand constructor for [`EngineError::Storage`].
    pub fn storage(msg: impl Into<String>) -> Self {
        EngineError::Storage(msg.into())
    }

    /// Shorthand constructor for [`EngineError::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }
}
