//! [`AgentCapability`] over an `edgequake-llm` provider.
//!
//! The adapter maps the crate's transcript onto provider chat messages, calls
//! the provider with retries, and parses tool calls back out of the reply.
//!
//! ## Why a text protocol for tools?
//!
//! Vision chat endpoints differ in whether and how they support native
//! function calling. A fenced ```` ```tool_call ```` JSON block works with any
//! chat model that follows instructions, so one adapter covers every
//! provider `edgequake-llm` can construct.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent under concurrent load.
//! Exponential backoff (`retry_backoff_ms * 2^attempt`) avoids a thundering
//! herd: with 500 ms base and 3 retries the waits are 500 ms → 1 s → 2 s.
//! Retries happen inside one [`AgentCapability::invoke`], so the page task
//! sees them as a single agent invocation.

use super::{AgentCapability, AssistantTurn, Message, Role, ToolCall, ToolDescriptor};
use crate::error::{AgentError, ProcessingError};
use crate::prompts::tool_protocol_instructions;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Upper bound on a single retry sleep.
const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Sampling and retry options for [`LlmAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmOptions {
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,
    /// Maximum output tokens per turn. Default: 4096.
    pub max_tokens: usize,
    /// Retries per invocation after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Base backoff between retries. Default: 500 ms.
    pub retry_backoff_ms: u64,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Agent capability backed by a chat-completion provider.
pub struct LlmAgent {
    provider: Arc<dyn LLMProvider>,
    options: LlmOptions,
    call_seq: AtomicU64,
}

impl fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmAgent")
            .field("provider", &"<dyn LLMProvider>")
            .field("options", &self.options)
            .finish()
    }
}

impl LlmAgent {
    /// Wrap an already-constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, options: LlmOptions) -> Self {
        Self {
            provider,
            options,
            call_seq: AtomicU64::new(0),
        }
    }

    pub fn builder() -> LlmAgentBuilder {
        LlmAgentBuilder::default()
    }

    pub fn options(&self) -> &LlmOptions {
        &self.options
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }

    fn next_call_id(&self) -> String {
        format!("call_{}", self.call_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl AgentCapability for LlmAgent {
    async fn invoke(
        &self,
        transcript: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<AssistantTurn, AgentError> {
        let messages = to_chat_messages(transcript, tools);
        let options = self.completion_options();
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.options.retry_backoff_ms, attempt);
                warn!(
                    "Agent retry {}/{} after {}ms",
                    attempt, self.options.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Agent turn: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return parse_turn(&response.content, || self.next_call_id());
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Agent attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(AgentError::Unavailable(format!(
            "{} (after {} retries)",
            last_err.unwrap_or_else(|| "Unknown error".to_string()),
            self.options.max_retries
        )))
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`LlmAgent`]; resolves the provider in [`build`](Self::build).
#[derive(Default)]
pub struct LlmAgentBuilder {
    provider: Option<Arc<dyn LLMProvider>>,
    provider_name: Option<String>,
    model: Option<String>,
    options: LlmOptions,
}

impl LlmAgentBuilder {
    /// Use a pre-built provider; takes priority over everything else.
    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.options.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.options.max_tokens = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.options.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.options.retry_backoff_ms = ms;
        self
    }

    pub fn build(self) -> Result<LlmAgent, ProcessingError> {
        let provider = resolve_provider(
            self.provider,
            self.provider_name.as_deref(),
            self.model.as_deref(),
        )?;
        Ok(LlmAgent::new(provider, self.options))
    }
}

/// Exponential backoff before retry `attempt` (1-based), capped.
fn retry_backoff(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_MS)
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProcessingError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ProcessingError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** — used as-is (tests, custom middleware).
/// 2. **Named provider + model** — `ProviderFactory` reads the matching API
///    key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
///    when both are set and non-empty.
/// 4. **OpenAI key** — `OPENAI_API_KEY` present selects OpenAI even when
///    other provider keys exist.
/// 5. **Auto-detection** via `ProviderFactory::from_env`.
fn resolve_provider(
    provider: Option<Arc<dyn LLMProvider>>,
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, ProcessingError> {
    if let Some(provider) = provider {
        return Ok(provider);
    }

    if let Some(name) = provider_name {
        return create_provider(name, model.unwrap_or(DEFAULT_MODEL));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model.unwrap_or(DEFAULT_MODEL));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ProcessingError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

// ── Transcript mapping ───────────────────────────────────────────────────

/// Map the transcript onto provider messages.
///
/// The tool protocol is appended to the first system message. Assistant
/// tool calls are rendered back as `tool_call` blocks so the model sees its
/// own requests; tool results travel as user messages.
fn to_chat_messages(transcript: &[Message], tools: &[ToolDescriptor]) -> Vec<ChatMessage> {
    let protocol = tool_protocol_instructions(tools);
    let mut protocol_placed = false;
    let mut out = Vec::with_capacity(transcript.len() + 1);

    for msg in transcript {
        match msg.role {
            Role::System => {
                let content = match (&protocol, protocol_placed) {
                    (Some(p), false) => {
                        protocol_placed = true;
                        format!("{}\n\n{}", msg.content, p)
                    }
                    _ => msg.content.clone(),
                };
                out.push(ChatMessage::system(content));
            }
            Role::User if msg.images.is_empty() => out.push(ChatMessage::user(msg.content.clone())),
            Role::User => {
                let images = msg
                    .images
                    .iter()
                    .map(|img| {
                        ImageData::new(img.data.clone(), img.mime_type.clone()).with_detail("high")
                    })
                    .collect();
                out.push(ChatMessage::user_with_images(msg.content.clone(), images));
            }
            Role::Assistant => out.push(ChatMessage::assistant(render_assistant(msg))),
            Role::Tool => {
                let label = if msg.is_error { "tool error" } else { "tool result" };
                out.push(ChatMessage::user(format!(
                    "[{} {}]\n{}",
                    label,
                    msg.tool_call_id.as_deref().unwrap_or("?"),
                    msg.content
                )));
            }
        }
    }

    if let (Some(p), false) = (protocol, protocol_placed) {
        out.insert(0, ChatMessage::system(p));
    }
    out
}

fn render_assistant(msg: &Message) -> String {
    let mut text = msg.content.trim().to_string();
    for call in &msg.tool_calls {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        let body = serde_json::json!({ "name": call.name, "arguments": call.arguments });
        text.push_str(&format!("```tool_call\n{}\n```", body));
    }
    text
}

// ── Response parsing ─────────────────────────────────────────────────────

static RE_TOOL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```tool_call[ \t]*\r?\n(.*?)\r?\n?```").unwrap());

#[derive(Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Split a reply into prose and `tool_call` blocks.
fn parse_turn(
    content: &str,
    mut next_id: impl FnMut() -> String,
) -> Result<AssistantTurn, AgentError> {
    let mut tool_calls = Vec::new();
    for caps in RE_TOOL_CALL.captures_iter(content) {
        let raw: RawToolCall = serde_json::from_str(caps[1].trim()).map_err(|e| {
            AgentError::MalformedResponse(format!("unparseable tool_call block: {e}"))
        })?;
        let arguments = if raw.arguments.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw.arguments
        };
        tool_calls.push(ToolCall {
            id: next_id(),
            name: raw.name,
            arguments,
        });
    }

    let content = if tool_calls.is_empty() {
        content.to_string()
    } else {
        RE_TOOL_CALL.replace_all(content, "").trim().to_string()
    };

    Ok(AssistantTurn {
        content,
        tool_calls,
    })
}
