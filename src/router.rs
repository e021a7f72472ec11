//! Ordered-fallback routing across generation providers.
//!
//! The router holds the configured provider order and applies the fallback
//! policy: the default provider is attempted first; a transient failure or
//! per-attempt timeout moves on to the next candidate; content-policy and
//! auth/quota errors surface immediately (switching vendors does not fix
//! either); exhausting the list fails with
//! [`EngineError::AllProvidersUnavailable`] carrying the attempted names.
//!
//! For streamed generation, fallback is only possible while no token has
//! been forwarded downstream — once output has flowed, re-generating with
//! another provider would splice two answers together, so a mid-stream
//! failure is terminal for the turn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::GenerationConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{GenerationRequest, GenerationResponse};
use crate::provider::{ChatProvider, HttpChatProvider};

/// Routes generation requests across an ordered provider list.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
    per_attempt_timeout: Duration,
}

impl ProviderRouter {
    /// Build a router over an explicit provider list. The list order is the
    /// fallback order.
    pub fn new(
        providers: Vec<Arc<dyn ChatProvider>>,
        per_attempt_timeout: Duration,
    ) -> EngineResult<Self> {
        if providers.is_empty() {
            return Err(EngineError::provider("no generation providers configured"));
        }
        Ok(Self {
            providers,
            per_attempt_timeout,
        })
    }

    /// Build HTTP providers from configuration, in `provider_order`.
    pub fn from_config(config: &GenerationConfig) -> EngineResult<Self> {
        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();
        for name in &config.provider_order {
            let provider_config = config
                .providers
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| {
                    EngineError::provider(format!("provider_order names unknown provider '{name}'"))
                })?;
            providers.push(Arc::new(HttpChatProvider::new(provider_config)?));
        }
        Self::new(
            providers,
            Duration::from_secs(config.per_attempt_timeout_secs),
        )
    }

    /// Generate a complete response, falling back through the provider
    /// order on transient failure or attempt timeout.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> EngineResult<GenerationResponse> {
        let mut attempted = Vec::new();

        for provider in &self.providers {
            attempted.push(provider.name().to_string());

            match timeout(self.per_attempt_timeout, provider.generate(request)).await {
                Err(_) => {
                    warn!(provider = provider.name(), "provider attempt timed out");
                    continue;
                }
                Ok(Err(EngineError::Transient(detail))) => {
                    warn!(provider = provider.name(), %detail, "transient provider failure");
                    continue;
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(mut response)) => {
                    info!(provider = provider.name(), "generation complete");
                    response.attempted = attempted;
                    return Ok(response);
                }
            }
        }

        Err(EngineError::AllProvidersUnavailable { attempted })
    }

    /// Generate while streaming token fragments to `downstream`.
    ///
    /// Fallback applies only while no fragment has been forwarded; after
    /// that, a provider failure fails the turn.
    pub async fn generate_stream(
        &self,
        request: &GenerationRequest,
        downstream: mpsc::Sender<String>,
    ) -> EngineResult<GenerationResponse> {
        let mut attempted = Vec::new();

        for provider in &self.providers {
            attempted.push(provider.name().to_string());

            let (tx, mut rx) = mpsc::channel::<String>(32);
            let forwarded = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&forwarded);
            let sink = downstream.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(fragment) = rx.recv().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // A dropped downstream receiver means the client went
                    // away; keep draining so the provider can finish.
                    let _ = sink.send(fragment).await;
                }
            });

            let attempt = timeout(
                self.per_attempt_timeout,
                provider.generate_stream(request, tx),
            )
            .await;
            // The provider's sender is gone either way; wait for the
            // forwarder to drain before inspecting the count.
            let _ = forwarder.await;
            let streamed = forwarded.load(Ordering::SeqCst) > 0;

            match attempt {
                Err(_) if !streamed => {
                    warn!(provider = provider.name(), "provider attempt timed out");
                    continue;
                }
                Err(_) => {
                    return Err(EngineError::transient(
                        "provider timed out after streaming began",
                    ));
                }
                Ok(Err(EngineError::Transient(detail))) if !streamed => {
                    warn!(provider = provider.name(), %detail, "transient provider failure");
                    continue;
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(mut response)) => {
                    info!(provider = provider.name(), "generation complete");
                    response.attempted = attempted;
                    return Ok(response);
                }
            }
        }

        Err(EngineError::AllProvidersUnavailable { attempted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".into(),
            messages: vec![crate::models::ChatMessage {
                role: Role::User,
                content: "hello".into(),
            }],
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    enum Script {
        Succeed(&'static str),
        Transient,
        ContentRejected,
        AuthFailure,
        Hang,
    }

    struct ScriptedProvider {
        name: &'static str,
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> EngineResult<GenerationResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Succeed(content) => Ok(GenerationResponse {
                    content: content.to_string(),
                    provider: self.name.to_string(),
                    model: "scripted".into(),
                    usage: TokenUsage::default(),
                    attempted: Vec::new(),
                }),
                Script::Transient => Err(EngineError::transient("connection reset")),
                Script::ContentRejected => {
                    Err(EngineError::ContentRejected("policy violation".into()))
                }
                Script::AuthFailure => Err(EngineError::provider("invalid api key")),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    /// Streams one token, then fails transiently.
    struct MidStreamFailure;

    #[async_trait]
    impl ChatProvider for MidStreamFailure {
        fn name(&self) -> &str {
            "midstream"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> EngineResult<GenerationResponse> {
            Err(EngineError::transient("not used"))
        }

        async fn generate_stream(
            &self,
            _request: &GenerationRequest,
            tx: mpsc::Sender<String>,
        ) -> EngineResult<GenerationResponse> {
            tx.send("partial".into()).await.ok();
            Err(EngineError::transient("connection dropped mid-answer"))
        }
    }

    #[tokio::test]
    async fn test_fallback_on_transient() {
        let a = ScriptedProvider::new("a", Script::Transient);
        let b = ScriptedProvider::new("b", Script::Succeed("from b"));
        let router = ProviderRouter::new(
            vec![a.clone() as Arc<dyn ChatProvider>, b.clone() as _],
            Duration::from_secs(5),
        )
        .unwrap();

        let response = router.generate(&request()).await.unwrap();
        assert_eq!(response.content, "from b");
        assert_eq!(response.provider, "b");
        assert_eq!(response.attempted, vec!["a", "b"]);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_content_rejection_short_circuits() {
        let a = ScriptedProvider::new("a", Script::ContentRejected);
        let b = ScriptedProvider::new("b", Script::Succeed("from b"));
        let router = ProviderRouter::new(
            vec![a.clone() as Arc<dyn ChatProvider>, b.clone() as _],
            Duration::from_secs(5),
        )
        .unwrap();

        let err = router.generate(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::ContentRejected(_)));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_immediately() {
        let a = ScriptedProvider::new("a", Script::AuthFailure);
        let b = ScriptedProvider::new("b", Script::Succeed("from b"));
        let router = ProviderRouter::new(
            vec![a as Arc<dyn ChatProvider>, b.clone() as _],
            Duration::from_secs(5),
        )
        .unwrap();

        let err = router.generate(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_all_attempts() {
        let a = ScriptedProvider::new("a", Script::Transient);
        let b = ScriptedProvider::new("b", Script::Transient);
        let router = ProviderRouter::new(
            vec![a as Arc<dyn ChatProvider>, b as _],
            Duration::from_secs(5),
        )
        .unwrap();

        let err = router.generate(&request()).await.unwrap_err();
        match err {
            EngineError::AllProvidersUnavailable { attempted } => {
                assert_eq!(attempted, vec!["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_attempt_timeout_falls_back() {
        let a = ScriptedProvider::new("a", Script::Hang);
        let b = ScriptedProvider::new("b", Script::Succeed("from b"));
        let router = ProviderRouter::new(
            vec![a as Arc<dyn ChatProvider>, b as _],
            Duration::from_millis(50),
        )
        .unwrap();

        let response = router.generate(&request()).await.unwrap();
        assert_eq!(response.provider, "b");
        assert_eq!(response.attempted, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_provider_list_rejected() {
        assert!(ProviderRouter::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_stream_forwards_tokens_and_falls_back_before_first_token() {
        let a = ScriptedProvider::new("a", Script::Transient);
        let b = ScriptedProvider::new("b", Script::Succeed("streamed answer"));
        let router = ProviderRouter::new(
            vec![a as Arc<dyn ChatProvider>, b as _],
            Duration::from_secs(5),
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let response = router.generate_stream(&request(), tx).await.unwrap();
        assert_eq!(response.content, "streamed answer");
        assert_eq!(response.attempted, vec!["a", "b"]);

        let mut fragments = Vec::new();
        while let Some(fragment) = rx.recv().await {
            fragments.push(fragment);
        }
        assert_eq!(fragments.concat(), "streamed answer");
    }

    #[tokio::test]
    async fn test_stream_failure_after_tokens_is_terminal() {
        let a: Arc<dyn ChatProvider> = Arc::new(MidStreamFailure);
        let b = ScriptedProvider::new("b", Script::Succeed("should not run"));
        let router = ProviderRouter::new(
            vec![a, b.clone() as Arc<dyn ChatProvider>],
            Duration::from_secs(5),
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let err = router.generate_stream(&request(), tx).await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));
        assert_eq!(b.calls(), 0);
        // The partial fragment was forwarded before the failure.
        assert_eq!(rx.recv().await.as_deref(), Some("partial"));
    }
}
