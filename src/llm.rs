//! Language model capability
//!
//! The pipeline calls out through exactly one abstract capability: hand a
//! prompt to a language model, get text back. Everything else (extraction
//! parsing, fusion fallbacks) is built on top of this trait, so callers can
//! inject an HTTP-backed client, a scripted test double, or nothing at all.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Abstract "ask a language model for text" capability.
///
/// Implementations may error or hang; callers bound every invocation with
/// [`complete_bounded`] so a misbehaving backend degrades into the
/// deterministic fallback instead of stalling the pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a prompt and return the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Human-readable name for this backend (used in logs).
    fn name(&self) -> &str {
        "llm"
    }
}

/// Run `model.complete(prompt)` bounded by `timeout`.
///
/// A timeout is reported as [`Error::LanguageModelTimeout`]; the caller
/// decides whether to fall back or surface it.
pub async fn complete_bounded(
    model: &dyn LanguageModel,
    prompt: &str,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, model.complete(prompt)).await {
        Ok(reply) => reply,
        Err(_) => {
            tracing::warn!(backend = model.name(), ?timeout, "language model call timed out");
            Err(Error::LanguageModelTimeout(timeout))
        }
    }
}

/// Configuration for the HTTP language model client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpModelConfig {
    /// Chat-completions endpoint (OpenAI-compatible)
    pub endpoint: String,

    /// API key sent as a bearer token (empty = no auth header)
    #[serde(default)]
    pub api_key: String,

    /// Model identifier passed through to the backend
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum reply tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    3000
}

/// Language model backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpLanguageModel {
    config: HttpModelConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: String,
}

impl HttpModelConfig {
    /// Config for `endpoint`/`model` with default timeout and sampling.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: String::new(),
            model: model.into(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }
}

impl HttpLanguageModel {
    /// Create a client from the given configuration.
    pub fn new(config: HttpModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(Error::LanguageModel(format!(
                "backend returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(Error::LanguageModel("backend returned empty reply".into()));
        }
        Ok(content)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted test doubles shared by the pipeline tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed reply for every prompt, counting calls.
    pub struct ScriptedModel {
        reply: String,
        pub calls: AtomicUsize,
    }

    impl ScriptedModel {
        pub fn new(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Fails every call, for fault-injection tests.
    pub struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(Error::LanguageModel("injected failure".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Never returns; exercises the timeout bound.
    pub struct HangingModel;

    #[async_trait]
    impl LanguageModel for HangingModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_through_reply() {
        let model = ScriptedModel::new("hello");
        let reply = complete_bounded(&model, "prompt", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let model = HangingModel;
        let result = complete_bounded(&model, "prompt", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::LanguageModelTimeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_propagates_errors() {
        let model = FailingModel;
        let result = complete_bounded(&model, "prompt", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::LanguageModel(_))));
    }
}
