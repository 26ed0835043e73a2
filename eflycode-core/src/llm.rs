//! The model-provider request/response wire shapes and the `Provider` trait.
//!
//! The `Provider` trait exposes exactly two operations, `call` and `stream`,
//! plus a `capabilities` descriptor. It does not mandate a wire protocol;
//! [`crate::providers::OpenAICompatibleProvider`] is one concrete, swappable
//! realization.

use std::ops::{Add, AddAssign};
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, Role};
use crate::tool::ToolDefinition;

/// Token accounting for one model call, summed into `TaskStatistics` by the
/// run loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt (request) side.
    pub prompt_tokens: u64,
    /// Tokens in the completion (response) side.
    pub completion_tokens: u64,
    /// `prompt_tokens + completion_tokens`, as reported by the provider.
    pub total_tokens: u64,
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Sampling and shape parameters for one request. All optional; a provider
/// that ignores a field simply doesn't send it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Sequences that stop generation when encountered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// A request to a model provider: `{model, messages, tools?, generate_config?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    /// The model identifier to route the request to.
    pub model: String,
    /// The message list, already trimmed by the [`crate::context`] manager.
    pub messages: Vec<Message>,
    /// Tools to advertise to the model, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Sampling/shape parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_config: Option<GenerateConfig>,
}

impl LLMRequest {
    /// Build a request with no tools and no generation config.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            generate_config: None,
        }
    }

    /// Attach a tools list.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// A non-streaming model response: `{id, model, created, message, finish_reason?, usage?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Provider-assigned response id.
    pub id: String,
    /// The model that actually served the request.
    pub model: String,
    /// Unix timestamp (seconds) the response was created.
    pub created: i64,
    /// The resulting assistant message.
    pub message: Message,
    /// Why generation stopped (`"stop"`, `"tool_calls"`, `"length"`, …).
    pub finish_reason: Option<String>,
    /// Token accounting, if the provider reported it.
    pub usage: Option<TokenUsage>,
}

/// One incremental tool-call fragment within a [`ResponseDelta`], keyed by
/// `index` so fragments for the same call can be accumulated in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaToolCall {
    /// Position of this tool call among the assistant message's calls.
    pub index: usize,
    /// The provider-assigned call id, present on the first fragment.
    pub id: Option<String>,
    /// The tool name, present on the first fragment.
    pub function_name: Option<String>,
    /// An incremental fragment of the JSON arguments string.
    pub arguments_fragment: Option<String>,
}

/// A sparse `Message` fragment carried by a streaming chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseDelta {
    /// The message role, present only on the first chunk of a message.
    pub role: Option<Role>,
    /// An incremental fragment of the message's text content.
    pub content: Option<String>,
    /// Incremental tool-call fragments, if the model is calling tools.
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

/// One incrementally-streamed chunk: `{id, model, created, delta, finish_reason?, usage?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseChunk {
    /// Provider-assigned response id, stable across a stream's chunks.
    pub id: String,
    /// The model that actually served the request.
    pub model: String,
    /// Unix timestamp (seconds) the response was created.
    pub created: i64,
    /// The incremental fragment this chunk carries.
    pub delta: ResponseDelta,
    /// Set on the final chunk of the stream.
    pub finish_reason: Option<String>,
    /// Token accounting, usually present only on the final chunk.
    pub usage: Option<TokenUsage>,
}

/// What a provider implementation supports, advertised up front so the
/// agent can choose a calling convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    /// `true` if [`Provider::stream`] yields real incremental chunks.
    pub supports_streaming: bool,
    /// `true` if the provider accepts a `tools` list.
    pub supports_tools: bool,
}

/// A boxed stream of response chunks, as returned by [`Provider::stream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk>> + Send>>;

/// The model-provider interface the core consumes: exactly two operations,
/// `call` and `stream`, plus a capability descriptor.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a request and await the complete response.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AgentError::Http`] or
    /// [`crate::error::AgentError::Model`] on transport or provider failure.
    async fn call(&self, request: LLMRequest) -> Result<LLMResponse>;

    /// Send a request and stream back incremental chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be started; errors
    /// encountered mid-stream are yielded as `Err` items instead.
    async fn stream(&self, request: LLMRequest) -> Result<ChunkStream>;

    /// What this provider supports.
    fn capabilities(&self) -> ProviderCapabilities;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_add_assign_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total += TokenUsage {
            prompt_tokens: 2,
            completion_tokens: 1,
            total_tokens: 3,
        };
        assert_eq!(total.total_tokens, 18);
    }

    #[test]
    fn request_round_trips_through_json() {
        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let json = serde_json::to_string(&request).expect("serializes");
        let back: LLMRequest = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back.model, "gpt-4o");
        assert_eq!(back.messages.len(), 1);
    }

    #[test]
    fn request_with_tools_round_trips_through_json() {
        use crate::tool::{ToolDefinition, ToolPermission};

        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]).with_tools(vec![ToolDefinition::new(
            "read_file",
            "Reads a file from the workspace",
            ToolPermission::Read,
            serde_json::json!({"type": "object", "properties": {}}),
        )]);
        let json = serde_json::to_string(&request).expect("serializes");
        let back: LLMRequest = serde_json::from_str(&json).expect("deserializes");
        let tools = back.tools.expect("tools survive the round trip");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[0].permission, ToolPermission::Read);
    }
}
