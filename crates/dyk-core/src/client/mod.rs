//! Remote text-service client.
//!
//! [`TextService`] is the raw backend seam (one HTTP round trip).
//! [`TextServiceClient`] wraps a backend with rate limiting, per-call
//! timeouts, retry with jittered exponential backoff and response repair.
//! Generation and evaluation each get their own client instance.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dyk_core::client::{CompletionRequest, OpenRouterBackend, TextServiceClient};
//! use dyk_core::config::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let backend = OpenRouterBackend::new(std::env::var("OPENROUTER_API_KEY")?)?;
//! let client = TextServiceClient::new(Arc::new(backend), &config);
//! let text = client
//!     .complete_text(&CompletionRequest::new("Say hi", config.params.clone()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod repair;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ClientConfig, RetryConfig};
use crate::error::{CallError, Error, ParseError, Result, ServiceError};
use crate::rate_limit::RateLimiter;
use crate::types::ModelParams;

/// Default OpenRouter-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Characters of an error body kept in a status error
const MAX_ERROR_BODY: usize = 500;

/// Request timeout when none is configured
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// One prompt sent to a text service
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub params: ModelParams,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, params: ModelParams) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            params,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A generative text backend.
#[async_trait]
pub trait TextService: Send + Sync {
    /// Send one request and return the completion text.
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ServiceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenRouter backend
// ─────────────────────────────────────────────────────────────────────────────

/// Chat-completions backend for OpenRouter and compatible gateways.
#[derive(Clone)]
pub struct OpenRouterBackend {
    base_url: String,
    api_key: String,
    app_name: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenRouterBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Other("API key must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            app_name: "dyk-insights".to_string(),
            timeout: DEFAULT_TIMEOUT,
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request HTTP timeout, reported back in [`ServiceError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion text from a 2xx chat-completions body.
fn completion_text(body: &str) -> std::result::Result<String, ServiceError> {
    let data: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::MalformedResponse(format!("unreadable completion envelope: {e}")))?;
    data.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ServiceError::EmptyCompletion("response has no message content".into()))
}

#[async_trait]
impl TextService for OpenRouterBackend {
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ServiceError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &request.params.model,
            messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.params.model, "chat completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", &self.app_name)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::from_http(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(ServiceError::status(status.as_u16(), message));
        }

        let body = resp.text().await.map_err(|e| ServiceError::from_http(e, self.timeout))?;
        completion_text(&body)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client with rate limiting and retries
// ─────────────────────────────────────────────────────────────────────────────

/// A backend plus the policies governing one logical call.
#[derive(Clone)]
pub struct TextServiceClient {
    service: Arc<dyn TextService>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    timeout: Duration,
}

impl TextServiceClient {
    /// Build a client with its own limiter from `config`.
    pub fn new(service: Arc<dyn TextService>, config: &ClientConfig) -> Self {
        Self {
            service,
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            retry: config.retry,
            timeout: config.timeout(),
        }
    }

    /// Share an existing limiter instead of the one built from config.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Complete `request`, retrying transient failures.
    pub async fn complete_text(&self, request: &CompletionRequest) -> std::result::Result<String, CallError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.limiter.acquire().await;
            attempt += 1;

            let result = match tokio::time::timeout(self.timeout, self.service.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.timeout.as_millis() as u64)),
            };

            let error = match result {
                Ok(text) => return Ok(text),
                Err(ServiceError::EmptyCompletion(reason) | ServiceError::MalformedResponse(reason)) => {
                    warn!(error = %reason, model = %request.params.model, "unusable response body");
                    return Err(ParseError::no_content(reason).into());
                }
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, model = %request.params.model, "request rejected");
                    return Err(CallError::Rejected(e));
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "retries exhausted");
                return Err(CallError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.backoff_with_jitter(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Complete `request` and parse the (repaired) response as `T`.
    pub async fn call<T: DeserializeOwned>(&self, request: &CompletionRequest) -> std::result::Result<T, CallError> {
        let text = self.complete_text(request).await?;
        repair::parse_json(&text).map_err(|e| {
            debug!(error = %e, "response did not parse");
            CallError::from(e)
        })
    }

    fn backoff_with_jitter(&self, retry: u32) -> Duration {
        let base = self.retry.backoff(retry).as_secs_f64();
        let jitter = rand::thread_rng().gen_range(0.0..=0.5 * base);
        let cap = Duration::from_millis(self.retry.max_delay_ms).as_secs_f64();
        Duration::from_secs_f64((base + jitter).min(cap))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One scripted backend reply.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Text(String),
        Error(ServiceError),
        /// Sleep past any reasonable timeout.
        Hang,
    }

    /// Backend returning scripted replies in order, repeating the last.
    pub struct ScriptedService {
        replies: Mutex<VecDeque<Reply>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedService {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextService for ScriptedService {
        async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                }
            };
            match reply {
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Error(e)) => Err(e),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ServiceError::Transport("hung".into()))
                }
                None => Err(ServiceError::Transport("no scripted reply".into())),
            }
        }
    }

    /// Backend that answers with a closure over the prompt.
    pub struct FnService<F>(F);

    impl<F> FnService<F>
    where
        F: Fn(&CompletionRequest) -> std::result::Result<String, ServiceError> + Send + Sync,
    {
        pub fn new(f: F) -> Self {
            Self(f)
        }
    }

    #[async_trait]
    impl<F> TextService for FnService<F>
    where
        F: Fn(&CompletionRequest) -> std::result::Result<String, ServiceError> + Send + Sync,
    {
        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ServiceError> {
            (self.0)(request)
        }
    }

    pub fn fast_config() -> ClientConfig {
        ClientConfig {
            rate_limit: crate::config::RateLimitConfig {
                requests_per_second: 1000,
                requests_per_minute: 60_000,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 100,
            },
            timeout_secs: 1,
            params: ModelParams::default(),
        }
    }
}
