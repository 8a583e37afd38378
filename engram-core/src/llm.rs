//! LLM provider abstraction
//!
//! The orchestrator and the compaction engine talk to agents through
//! [`LlmProvider`]. Implementations must respect the request's model and
//! token budget; deadlines are enforced by the caller with
//! `tokio::time::timeout`, so a dropped request cancels the in-flight call.

use crate::constants::defaults;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System preamble; may be empty.
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            prompt: prompt.into(),
            model: model.into(),
            max_tokens: defaults::LLM_MAX_TOKENS,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A completed generation with usage accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Trait for agents that turn prompts into answers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion. Transport failures surface as
    /// [`Error::Llm`]; the orchestrator converts them into a graceful
    /// degraded answer rather than failing the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<Completion>;
}

/// Rough cost estimate: blended per-token pricing when the provider does
/// not report cost itself.
#[must_use]
pub fn estimate_cost_usd(input_tokens: u64, output_tokens: u64) -> f64 {
    const INPUT_PER_TOKEN: f64 = 3.0 / 1_000_000.0;
    const OUTPUT_PER_TOKEN: f64 = 15.0 / 1_000_000.0;
    input_tokens as f64 * INPUT_PER_TOKEN + output_tokens as f64 * OUTPUT_PER_TOKEN
}

/// Whitespace token estimate for providers that do not report usage.
#[must_use]
pub fn approx_token_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Pull the first `{...}` block out of a model response.
///
/// Synthesis and extraction prompts ask for JSON, but models wrap it in
/// prose often enough that callers scan for the outermost braces.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Scripted provider for tests and offline runs.
///
/// Returns queued responses in order, then falls back to the default
/// response. Never fails unless constructed with [`MockLlmProvider::failing`].
pub struct MockLlmProvider {
    queue: Mutex<VecDeque<String>>,
    default_response: String,
    fail: bool,
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_response: "This is a synthesized answer grounded in the provided context, \
                               covering the question in enough depth to be stored."
                .to_string(),
            fail: false,
        }
    }

    /// Provider with a fixed default response.
    #[must_use]
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_response: response.into(),
            fail: false,
        }
    }

    /// Provider that always fails, for degradation tests.
    #[must_use]
    pub fn failing() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), default_response: String::new(), fail: true }
    }

    /// Queue the next response.
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(response.into());
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Completion> {
        if self.fail {
            return Err(Error::Llm("mock transport failure".into()));
        }
        let text = self
            .queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| self.default_response.clone());

        let input_tokens = approx_token_count(&request.prompt) + approx_token_count(&request.system);
        let output_tokens = approx_token_count(&text);
        Ok(Completion {
            text,
            model: request.model.clone(),
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost_usd(input_tokens, output_tokens),
            latency_ms: 0,
        })
    }
}

#[cfg(feature = "remote-providers")]
pub use remote::OpenAiChatProvider;

#[cfg(feature = "remote-providers")]
mod remote {
    use super::{approx_token_count, estimate_cost_usd, Completion, GenerationRequest, LlmProvider};
    use crate::constants::defaults;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Instant;

    /// Chat-completions provider for any OpenAI-compatible endpoint.
    pub struct OpenAiChatProvider {
        api_key: String,
        client: reqwest::Client,
        base_url: String,
    }

    #[derive(Serialize)]
    struct ChatRequest<'a> {
        model: &'a str,
        messages: Vec<ChatMessage<'a>>,
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
        usage: Option<ChatUsage>,
    }

    #[derive(Deserialize)]
    struct ChatChoice {
        message: ChatChoiceMessage,
    }

    #[derive(Deserialize)]
    struct ChatChoiceMessage {
        content: String,
    }

    #[derive(Deserialize)]
    struct ChatUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
    }

    impl OpenAiChatProvider {
        pub fn new(api_key: String, base_url: String) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(defaults::LLM_TIMEOUT)
                .build()
                .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;
            Ok(Self { api_key, client, base_url })
        }
    }

    #[async_trait]
    impl LlmProvider for OpenAiChatProvider {
        async fn generate(&self, request: &GenerationRequest) -> Result<Completion> {
            let start = Instant::now();
            let mut messages = Vec::with_capacity(2);
            if !request.system.is_empty() {
                messages.push(ChatMessage { role: "system", content: &request.system });
            }
            messages.push(ChatMessage { role: "user", content: &request.prompt });

            let body = ChatRequest {
                model: &request.model,
                messages,
                max_tokens: request.max_tokens,
            };

            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Llm(format!("chat request failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Llm(format!("chat API error {status}: {body}")));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| Error::Llm(format!("failed to parse chat response: {e}")))?;

            let text = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| Error::Llm("chat API returned no choices".into()))?;

            let (input_tokens, output_tokens) = parsed.usage.map_or_else(
                || (approx_token_count(&request.prompt), approx_token_count(&text)),
                |u| (u.prompt_tokens, u.completion_tokens),
            );

            Ok(Completion {
                text,
                model: request.model.clone(),
                input_tokens,
                output_tokens,
                cost_usd: estimate_cost_usd(input_tokens, output_tokens),
                latency_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}
