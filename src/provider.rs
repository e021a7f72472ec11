//! Generation provider abstraction and the HTTP implementation.
//!
//! [`ChatProvider`] is the capability interface every generation backend
//! implements: a blocking completion and a streamed variant that emits
//! token fragments over a channel while still returning the final response.
//! [`HttpChatProvider`] speaks the OpenAI-compatible chat-completions wire
//! format, which covers most hosted vendors via a `base_url` override.
//!
//! Error classification is what the router's fallback policy keys off:
//!
//! - timeouts, network errors, 429, 5xx → [`EngineError::Transient`]
//! - content-policy refusals (HTTP 400 policy codes, `content_filter`
//!   finish reason) → [`EngineError::ContentRejected`]
//! - auth/quota and other client errors → [`EngineError::Provider`]
//!
//! The provider itself never retries; retry-by-fallback is the router's job.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::ProviderConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{GenerationRequest, GenerationResponse, Role, TokenUsage};

/// A generation backend behind the router.
///
/// Implementations are stateless from the caller's perspective and safe for
/// unsynchronized concurrent use.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Name used in configuration and turn outcomes.
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Produce a complete response for the request.
    async fn generate(&self, request: &GenerationRequest) -> EngineResult<GenerationResponse>;

    /// Produce a response while streaming token fragments through `tx`.
    ///
    /// The fragment sequence is lazy, finite, and non-restartable; dropping
    /// the receiver cancels it without error. The default implementation
    /// falls back to [`ChatProvider::generate`] and emits the whole answer
    /// as a single fragment.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> EngineResult<GenerationResponse> {
        let response = self.generate(request).await?;
        // Receiver may already be gone; that only means nobody is watching.
        let _ = tx.send(response.content.clone()).await;
        Ok(response)
    }
}

/// Chat client for OpenAI-compatible chat-completions endpoints.
pub struct HttpChatProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpChatProvider {
    /// Build a provider from configuration.
    ///
    /// Fails with a provider error if the configured API-key environment
    /// variable is not set.
    pub fn new(config: &ProviderConfig) -> EngineResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EngineError::provider(format!(
                "{} environment variable not set for provider '{}'",
                config.api_key_env, config.name
            ))
        })?;

        let client = reqwest::Client::new();
        Ok(Self {
            client,
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system,
        })];
        for message in &request.messages {
            messages.push(serde_json::json!({
                "role": wire_role(message.role),
                "content": message.content,
            }));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> EngineResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request, stream))
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_chat_status(status, &detail));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> EngineResult<GenerationResponse> {
        let response = self.send(request, false).await?;
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::transient(format!("chat response read failed: {e}")))?;
        let parsed = parse_chat_response(&body)?;

        if parsed.finish_reason.as_deref() == Some("content_filter") {
            return Err(EngineError::ContentRejected(
                "provider flagged the response with a content filter".into(),
            ));
        }

        Ok(GenerationResponse {
            content: parsed.content,
            provider: self.name.clone(),
            model: self.model.clone(),
            usage: parsed.usage,
            attempted: Vec::new(),
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> EngineResult<GenerationResponse> {
        let response = self.send(request, true).await?;
        let mut stream = response.bytes_stream();

        let mut buffer = String::new();
        let mut content = String::new();
        let mut usage = TokenUsage::default();
        let mut finish_reason: Option<String> = None;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| EngineError::transient(format!("chat stream broke: {e}")))?;
            // Normalize CRLF framing so event splitting only deals with \n.
            buffer.push_str(&String::from_utf8_lossy(&chunk).replace('\r', ""));

            // SSE events are separated by a blank line.
            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);
                handle_sse_event(
                    &event,
                    &tx,
                    &mut content,
                    &mut usage,
                    &mut finish_reason,
                )
                .await?;
            }
        }

        // A final event may arrive without its trailing blank line.
        if !buffer.trim().is_empty() {
            let event = std::mem::take(&mut buffer);
            handle_sse_event(&event, &tx, &mut content, &mut usage, &mut finish_reason).await?;
        }

        if finish_reason.as_deref() == Some("content_filter") {
            return Err(EngineError::ContentRejected(
                "provider flagged the response with a content filter".into(),
            ));
        }

        Ok(GenerationResponse {
            content,
            provider: self.name.clone(),
            model: self.model.clone(),
            usage,
            attempted: Vec::new(),
        })
    }
}

/// Apply one SSE event's `data:` payloads to the accumulating response.
async fn handle_sse_event(
    event: &str,
    tx: &mpsc::Sender<String>,
    content: &mut String,
    usage: &mut TokenUsage,
    finish_reason: &mut Option<String>,
) -> EngineResult<()> {
    for line in event.lines() {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }
        let delta = parse_stream_data(data)?;
        if let Some(fragment) = delta.content {
            content.push_str(&fragment);
            // A dropped receiver means the consumer went away; keep
            // draining so the final response stays whole.
            let _ = tx.send(fragment).await;
        }
        if let Some(reason) = delta.finish_reason {
            *finish_reason = Some(reason);
        }
        if let Some(reported) = delta.usage {
            *usage = reported;
        }
    }
    Ok(())
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Map an HTTP error status onto the engine taxonomy.
pub(crate) fn classify_chat_status(status: StatusCode, detail: &str) -> EngineError {
    if status.as_u16() == 429 || status.is_server_error() {
        return EngineError::transient(format!("chat API error {status}: {detail}"));
    }
    if status == StatusCode::BAD_REQUEST
        && (detail.contains("content_policy") || detail.contains("content_filter"))
    {
        return EngineError::ContentRejected(detail.to_string());
    }
    EngineError::provider(format!("chat API error {status}: {detail}"))
}

#[derive(Debug)]
struct ParsedCompletion {
    content: String,
    finish_reason: Option<String>,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Parse a non-streaming chat-completions response body.
fn parse_chat_response(body: &str) -> EngineResult<ParsedCompletion> {
    let parsed: WireCompletion = serde_json::from_str(body)
        .map_err(|e| EngineError::provider(format!("invalid chat response: {e}")))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::provider("chat response contained no choices"))?;

    Ok(ParsedCompletion {
        content: choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default(),
        finish_reason: choice.finish_reason,
        usage: parsed.usage.map(TokenUsage::from).unwrap_or_default(),
    })
}

#[derive(Debug, Default)]
struct StreamDelta {
    content: Option<String>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

/// Parse one SSE `data:` payload from a streaming response.
fn parse_stream_data(data: &str) -> EngineResult<StreamDelta> {
    let parsed: WireCompletion = serde_json::from_str(data)
        .map_err(|e| EngineError::provider(format!("invalid stream chunk: {e}")))?;

    let mut delta = StreamDelta {
        usage: parsed.usage.map(TokenUsage::from),
        ..StreamDelta::default()
    };
    if let Some(choice) = parsed.choices.into_iter().next() {
        delta.content = choice.delta.and_then(|d| d.content);
        delta.finish_reason = choice.finish_reason;
    }
    Ok(delta)
}
