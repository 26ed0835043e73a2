//! A minimal `OpenAI`-compatible HTTP [`Provider`].
//!
//! Any server that speaks the Chat Completions wire format (OpenAI itself,
//! Azure `OpenAI`, local `OpenAI`-compatible servers) works against this
//! client by swapping the base URL.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::{
    ChunkStream, DeltaToolCall, GenerateConfig, LLMRequest, LLMResponse, Provider,
    ProviderCapabilities, ResponseChunk, ResponseDelta, TokenUsage,
};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDefinition;

/// Default `OpenAI` API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// A model-provider client speaking the `OpenAI` Chat Completions wire
/// format over HTTP.
#[derive(Clone)]
pub struct OpenAICompatibleProvider {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAICompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAICompatibleProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAICompatibleProvider {
    /// A client against the default `OpenAI` API base URL.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENAI_API_BASE_URL)
    }

    /// A client against a custom base URL (Azure, a local server, a proxy).
    #[must_use]
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn build_request_body(&self, request: &LLMRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(convert_message).collect::<Vec<_>>(),
        });

        if let Some(config) = &request.generate_config {
            apply_generate_config(&mut body, config, &request.model);
        }

        if let Some(tools) = &request.tools
            && !tools.is_empty()
        {
            body["tools"] = json!(tools.iter().map(to_openai_tool).collect::<Vec<_>>());
        }

        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.auth_headers())
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(AgentError::Model {
            message: format!("provider returned {status}: {error_text}"),
        })
    }
}

/// `true` unless `model_id` is one of `OpenAI`'s o3/o4/gpt-5 models, which
/// reject the `stop` parameter entirely (`o3-mini` is the one exception).
#[must_use]
pub fn model_supports_stop_parameter(model_id: &str) -> bool {
    let model_name = model_id.split('/').next_back().unwrap_or(model_id);
    if model_name == "o3-mini" {
        return true;
    }
    !(model_name.starts_with("o3") || model_name.starts_with("o4") || model_name.starts_with("gpt-5"))
}

/// `true` if `model_id` requires `max_completion_tokens` instead of the
/// deprecated `max_tokens` parameter (`OpenAI`'s o-series and gpt-5 series).
#[must_use]
pub fn model_requires_max_completion_tokens(model_id: &str) -> bool {
    let model_name = model_id.split('/').next_back().unwrap_or(model_id);
    model_name.starts_with("o1")
        || model_name.starts_with("o3")
        || model_name.starts_with("o4")
        || model_name.starts_with("gpt-5")
}

fn apply_generate_config(body: &mut Value, config: &GenerateConfig, model: &str) {
    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = config.max_tokens {
        if model_requires_max_completion_tokens(model) {
            body["max_completion_tokens"] = json!(max_tokens);
        } else {
            body["max_tokens"] = json!(max_tokens);
        }
    }
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(stop) = &config.stop_sequences
        && !stop.is_empty()
        && model_supports_stop_parameter(model)
    {
        body["stop"] = json!(stop);
    }
}

fn convert_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut obj = json!({ "role": role });
    if let Some(content) = &message.content {
        obj["content"] = json!(content);
    }
    if let Some(tool_calls) = &message.tool_calls {
        obj["tool_calls"] = json!(
            tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.function_name,
                            "arguments": call.arguments_json_string,
                        },
                    })
                })
                .collect::<Vec<_>>()
        );
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        obj["tool_call_id"] = json!(tool_call_id);
    }
    obj
}

fn to_openai_tool(definition: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": definition.name,
            "description": definition.description,
            "parameters": definition.parameters,
        },
    })
}

fn parse_response(json: Value) -> Result<LLMResponse> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| AgentError::model("provider response carried no choices"))?;

    let message_json = &choice["message"];
    let content = message_json["content"].as_str().map(String::from);
    let tool_calls = parse_tool_calls(&message_json["tool_calls"]);
    let finish_reason = choice["finish_reason"].as_str().map(String::from);

    let message = if let Some(calls) = tool_calls {
        Message::assistant_with_tool_calls(content, calls)
    } else {
        Message {
            role: Role::Assistant,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    };

    let usage = json.get("usage").map(|usage| TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    });

    Ok(LLMResponse {
        id: json["id"].as_str().unwrap_or_default().to_string(),
        model: json["model"].as_str().unwrap_or_default().to_string(),
        created: json["created"].as_i64().unwrap_or(0),
        message,
        finish_reason,
        usage,
    })
}

fn parse_tool_calls(value: &Value) -> Option<Vec<ToolCall>> {
    let array = value.as_array()?;
    Some(
        array
            .iter()
            .map(|call| {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
                let arguments = call["function"]["arguments"].as_str().unwrap_or("{}").to_string();
                ToolCall::new(id, name, arguments)
            })
            .collect(),
    )
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    async fn call(&self, request: LLMRequest) -> Result<LLMResponse> {
        let body = self.build_request_body(&request, false);
        let response = self.post(&body).await?;
        let json: Value = response.json().await?;
        parse_response(json)
    }

    async fn stream(&self, request: LLMRequest) -> Result<ChunkStream> {
        let body = self.build_request_body(&request, true);
        let response = self.post(&body).await?;
        Ok(Box::pin(SseChunkStream::new(response.bytes_stream())))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
        }
    }
}

/// Parses `OpenAI`'s SSE chat-completion stream, line-buffered, into
/// [`ResponseChunk`] items.
struct SseChunkStream<S> {
    inner: S,
    buffer: String,
}

impl<S> SseChunkStream<S> {
    const fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: String::new(),
        }
    }

    fn parse_line(line: &str) -> Option<Result<ResponseChunk>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return None;
        }
        let data = trimmed.strip_prefix("data: ")?;
        if data.trim() == "[DONE]" {
            return None;
        }
        Some(
            serde_json::from_str::<Value>(data)
                .map_err(|e| AgentError::model(format!("malformed stream chunk: {e}")))
                .map(Self::to_chunk),
        )
    }

    fn to_chunk(json: Value) -> ResponseChunk {
        let choice = json["choices"].get(0);
        let delta = choice.map(|c| &c["delta"]);
        let content = delta.and_then(|d| d["content"].as_str()).map(String::from);
        let role = delta
            .and_then(|d| d["role"].as_str())
            .and_then(|r| serde_json::from_value(Value::String(r.to_string())).ok());
        let tool_calls = delta
            .and_then(|d| d["tool_calls"].as_array())
            .map(|calls| calls.iter().map(Self::to_delta_tool_call).collect());
        let finish_reason = choice.and_then(|c| c["finish_reason"].as_str()).map(String::from);
        let usage = json.get("usage").map(|usage| TokenUsage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        });

        ResponseChunk {
            id: json["id"].as_str().unwrap_or_default().to_string(),
            model: json["model"].as_str().unwrap_or_default().to_string(),
            created: json["created"].as_i64().unwrap_or(0),
            delta: ResponseDelta {
                role,
                content,
                tool_calls,
            },
            finish_reason,
            usage,
        }
    }

    fn to_delta_tool_call(value: &Value) -> DeltaToolCall {
        DeltaToolCall {
            index: value["index"].as_u64().unwrap_or(0) as usize,
            id: value["id"].as_str().map(String::from),
            function_name: value["function"]["name"].as_str().map(String::from),
            arguments_fragment: value["function"]["arguments"].as_str().map(String::from),
        }
    }
}

impl<S> Stream for SseChunkStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<ResponseChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(pos) = self.buffer.find('\n') {
                let line = self.buffer[..pos].to_string();
                self.buffer.drain(..=pos);
                if let Some(result) = Self::parse_line(&line) {
                    return Poll::Ready(Some(result));
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        self.buffer.push_str(text);
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(AgentError::from(e)))),
                Poll::Ready(None) => {
                    if self.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    let remaining = std::mem::take(&mut self.buffer);
                    for line in remaining.lines() {
                        if let Some(result) = Self::parse_line(line) {
                            return Poll::Ready(Some(result));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_stop_parameter_excludes_reasoning_models() {
        assert!(model_supports_stop_parameter("gpt-4o"));
        assert!(model_supports_stop_parameter("o3-mini"));
        assert!(!model_supports_stop_parameter("o3"));
        assert!(!model_supports_stop_parameter("gpt-5"));
    }

    #[test]
    fn requires_max_completion_tokens_matches_reasoning_models() {
        assert!(!model_requires_max_completion_tokens("gpt-4o"));
        assert!(model_requires_max_completion_tokens("o1-mini"));
        assert!(model_requires_max_completion_tokens("gpt-5"));
    }

    #[test]
    fn build_request_body_carries_model_and_messages() {
        let provider = OpenAICompatibleProvider::new("test-key");
        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let body = provider.build_request_body(&request, false);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn parse_response_extracts_message_and_usage() {
        let json = json!({
            "id": "resp_1",
            "model": "gpt-4o",
            "created": 0,
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5},
        });
        let response = parse_response(json).expect("parses");
        assert_eq!(response.message.content.as_deref(), Some("hello"));
        assert_eq!(response.usage.expect("usage present").total_tokens, 5);
    }

    #[test]
    fn sse_line_skips_comments_and_done_marker() {
        assert!(SseChunkStream::<futures::stream::Empty<std::result::Result<bytes::Bytes, reqwest::Error>>>::parse_line(": comment").is_none());
        assert!(SseChunkStream::<futures::stream::Empty<std::result::Result<bytes::Bytes, reqwest::Error>>>::parse_line("data: [DONE]").is_none());
    }
}
