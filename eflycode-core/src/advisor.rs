//! The advisor chain: ordered before/after interceptors around a model call.
//!
//! Advisors compose as an onion: `before_*` hooks fire in list order on the
//! way in, `after_*` hooks fire in reverse order on the way out, and a failed
//! call is offered to advisors in reverse order for a chance at recovery
//! before the error propagates.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::llm::{ChunkStream, LLMRequest, LLMResponse, Provider, ResponseChunk};
use crate::message::{Message, Role};
use crate::tool::ToolDefinition;

/// An interceptor around one model call or stream. Every hook has a no-op
/// default so an advisor only implements the ones it cares about.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Called before a non-stream request is sent; may rewrite it.
    async fn before_call(&self, request: LLMRequest) -> LLMRequest {
        request
    }

    /// Called after a non-stream response arrives; may rewrite it.
    async fn after_call(&self, _request: &LLMRequest, response: LLMResponse) -> LLMResponse {
        response
    }

    /// Called when the inner call errors. Returning `Ok` short-circuits
    /// the remaining advisors and the chain returns that response instead
    /// of propagating the error.
    async fn on_call_error(&self, _request: &LLMRequest, error: AgentError) -> Result<LLMResponse> {
        Err(error)
    }

    /// Called before a streaming request is sent; may rewrite it.
    async fn before_stream(&self, request: LLMRequest) -> LLMRequest {
        request
    }

    /// Called for every chunk of a stream; may rewrite it.
    async fn after_stream(&self, _request: &LLMRequest, chunk: ResponseChunk) -> ResponseChunk {
        chunk
    }

    /// Called when the stream errors mid-flight.
    async fn on_stream_error(
        &self,
        _request: &LLMRequest,
        error: AgentError,
    ) -> Result<ResponseChunk> {
        Err(error)
    }
}

/// Wraps an ordered list of advisors around a raw provider call/stream.
#[derive(Clone)]
pub struct AdvisorChain {
    advisors: Vec<Arc<dyn Advisor>>,
}

impl std::fmt::Debug for AdvisorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorChain")
            .field("len", &self.advisors.len())
            .finish()
    }
}

impl AdvisorChain {
    /// Build a chain from an ordered advisor list.
    #[must_use]
    pub fn new(advisors: Vec<Arc<dyn Advisor>>) -> Self {
        Self { advisors }
    }

    /// Run `request` through `before_call`, the provider, then `after_call`
    /// in reverse; on error, offer `on_call_error` to each advisor in
    /// reverse until one recovers.
    ///
    /// # Errors
    ///
    /// Propagates the provider's error if no advisor recovers it.
    pub async fn call(&self, request: LLMRequest, provider: &dyn Provider) -> Result<LLMResponse> {
        let mut processed = request;
        for advisor in &self.advisors {
            processed = advisor.before_call(processed).await;
        }

        match provider.call(processed.clone()).await {
            Ok(mut response) => {
                for advisor in self.advisors.iter().rev() {
                    response = advisor.after_call(&processed, response).await;
                }
                Ok(response)
            }
            Err(mut error) => {
                for advisor in self.advisors.iter().rev() {
                    match advisor.on_call_error(&processed, error).await {
                        Ok(response) => return Ok(response),
                        Err(e) => error = e,
                    }
                }
                Err(error)
            }
        }
    }

    /// Run `request` through `before_stream` once, then map every chunk of
    /// the provider's stream through `after_stream` in reverse order,
    /// offering `on_stream_error` on failure.
    ///
    /// # Errors
    ///
    /// Propagates the provider's error if the stream could not be started,
    /// or if no advisor recovers a mid-stream error.
    pub async fn stream(
        self: Arc<Self>,
        request: LLMRequest,
        provider: Arc<dyn Provider>,
    ) -> Result<ChunkStream> {
        let mut processed = request;
        for advisor in &self.advisors {
            processed = advisor.before_stream(processed).await;
        }

        let inner = provider.stream(processed.clone()).await?;
        let chain = Arc::clone(&self);
        let processed_for_stream = processed;

        let mapped = stream! {
            futures::pin_mut!(inner);
            use futures::StreamExt;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(mut chunk) => {
                        for advisor in chain.advisors.iter().rev() {
                            chunk = advisor.after_stream(&processed_for_stream, chunk).await;
                        }
                        yield Ok(chunk);
                    }
                    Err(mut error) => {
                        let mut recovered = None;
                        for advisor in chain.advisors.iter().rev() {
                            match advisor.on_stream_error(&processed_for_stream, error).await {
                                Ok(chunk) => { recovered = Some(chunk); break; }
                                Err(e) => error = e,
                            }
                        }
                        match recovered {
                            Some(chunk) => yield Ok(chunk),
                            None => { yield Err(error); return; }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(mapped))
    }
}

/// Injects a rendered system prompt at index 0 of every request, unless one
/// is already present.
pub struct SystemPromptAdvisor {
    render: Box<dyn Fn() -> Option<String> + Send + Sync>,
}

impl std::fmt::Debug for SystemPromptAdvisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemPromptAdvisor").finish_non_exhaustive()
    }
}

impl SystemPromptAdvisor {
    /// Build an advisor that renders the system prompt on demand via
    /// `render`, so the agent's live tool list / workspace context is
    /// reflected on every call rather than baked in once at construction.
    #[must_use]
    pub fn new(render: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            render: Box::new(render),
        }
    }

    fn inject(&self, mut request: LLMRequest) -> LLMRequest {
        if request.messages.first().is_some_and(|m| m.role == Role::System) {
            return request;
        }
        if let Some(prompt) = (self.render)() {
            request.messages.insert(0, Message::system(prompt));
        }
        request
    }
}

#[async_trait]
impl Advisor for SystemPromptAdvisor {
    async fn before_call(&self, request: LLMRequest) -> LLMRequest {
        self.inject(request)
    }

    async fn before_stream(&self, request: LLMRequest) -> LLMRequest {
        self.inject(request)
    }
}

/// Name of the privileged tool this advisor guarantees is advertised and
/// whose call it converts into plain assistant text.
pub const FINISH_TASK_TOOL_NAME: &str = "finish_task";

const STREAM_CHUNK_SIZE: usize = 20;

#[derive(Debug, Default, Clone)]
struct ToolCallAccum {
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct StreamState {
    tool_calls: HashMap<usize, ToolCallAccum>,
    detected_finish_task: bool,
    finish_task_index: Option<usize>,
    content: String,
    content_index: usize,
    converted: bool,
}

/// Ensures `finish_task` is always advertised, and transparently converts
/// its invocation (streamed or not) into ordinary assistant text.
pub struct FinishTaskAdvisor {
    definition: ToolDefinition,
    stream_states: Mutex<HashMap<u64, StreamState>>,
}

impl std::fmt::Debug for FinishTaskAdvisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinishTaskAdvisor").finish_non_exhaustive()
    }
}

impl FinishTaskAdvisor {
    /// Build an advisor advertising `definition` as the `finish_task` tool.
    #[must_use]
    pub fn new(definition: ToolDefinition) -> Self {
        Self {
            definition,
            stream_states: Mutex::new(HashMap::new()),
        }
    }

    fn ensure_finish_task(&self, mut request: LLMRequest) -> LLMRequest {
        let tools = request.tools.get_or_insert_with(Vec::new);
        if !tools.iter().any(|t| t.name == FINISH_TASK_TOOL_NAME) {
            tools.push(self.definition.clone());
        }
        request
    }

    fn request_fingerprint(request: &LLMRequest) -> u64 {
        let mut hasher = DefaultHasher::new();
        for message in &request.messages {
            message.role.as_str().hash(&mut hasher);
            message.content.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn emit_content_chunk(state: &mut StreamState, mut chunk: ResponseChunk) -> ResponseChunk {
        if state.content.is_empty() {
            return chunk;
        }
        let remaining = &state.content[state.content_index..];
        if remaining.is_empty() {
            return chunk;
        }

        let piece = if chunk.finish_reason.is_some() {
            let piece = remaining.to_string();
            state.content_index = state.content.len();
            piece
        } else {
            let take = remaining.char_indices().nth(STREAM_CHUNK_SIZE).map_or(remaining.len(), |(i, _)| i);
            let piece = remaining[..take].to_string();
            state.content_index += take;
            piece
        };

        chunk.delta.content = Some(piece);
        chunk.delta.tool_calls = None;
        chunk
    }
}

#[async_trait]
impl Advisor for FinishTaskAdvisor {
    async fn before_call(&self, request: LLMRequest) -> LLMRequest {
        self.ensure_finish_task(request)
    }

    async fn before_stream(&self, request: LLMRequest) -> LLMRequest {
        let key = Self::request_fingerprint(&request);
        self.stream_states.lock().await.insert(key, StreamState::default());
        self.ensure_finish_task(request)
    }

    async fn after_call(&self, _request: &LLMRequest, mut response: LLMResponse) -> LLMResponse {
        let Some(tool_calls) = response.message.tool_calls.clone() else {
            return response;
        };
        if let Some(call) = tool_calls.iter().find(|c| c.function_name == FINISH_TASK_TOOL_NAME) {
            let content = call
                .parse_arguments()
                .ok()
                .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(str::to_string))
                .unwrap_or_default();
            response.message = Message::assistant(content);
        }
        response
    }

    async fn after_stream(&self, request: &LLMRequest, mut chunk: ResponseChunk) -> ResponseChunk {
        let key = Self::request_fingerprint(request);
        let mut states = self.stream_states.lock().await;
        let Some(state) = states.get_mut(&key) else {
            return chunk;
        };

        if state.converted {
            let result = Self::emit_content_chunk(state, chunk);
            if result.finish_reason.is_some() {
                states.remove(&key);
            }
            return result;
        }

        if let Some(tool_calls) = chunk.delta.tool_calls.take() {
            for delta in &tool_calls {
                let entry = state.tool_calls.entry(delta.index).or_default();
                if let Some(name) = &delta.function_name {
                    entry.name.clone_from(name);
                }
                if let Some(fragment) = &delta.arguments_fragment {
                    entry.arguments.push_str(fragment);
                }
                if entry.name == FINISH_TASK_TOOL_NAME {
                    state.detected_finish_task = true;
                    state.finish_task_index = Some(delta.index);
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&entry.arguments) {
                        if let Some(content) = parsed.get("content").and_then(|c| c.as_str()) {
                            state.content = content.to_string();
                            state.converted = true;
                            let result = Self::emit_content_chunk(state, chunk);
                            if result.finish_reason.is_some() {
                                states.remove(&key);
                            }
                            return result;
                        }
                    }
                }
            }
            // Arguments incomplete: suppress the raw tool-call delta so the
            // UI never sees a half-formed finish_task invocation.
            chunk.delta.tool_calls = None;
            if chunk.finish_reason.is_some() {
                states.remove(&key);
            }
            return chunk;
        }

        if chunk.finish_reason.is_some() {
            states.remove(&key);
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DeltaToolCall, ProviderCapabilities, ResponseDelta};
    use crate::tool::{ToolDefinition, ToolPermission};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn finish_task_definition() -> ToolDefinition {
        ToolDefinition {
            name: FINISH_TASK_TOOL_NAME.to_string(),
            description: "End the task".to_string(),
            permission: ToolPermission::Read,
            parameters: json!({"type": "object", "properties": {"content": {"type": "string"}}, "required": ["content"]}),
        }
    }

    struct StubProvider {
        response: LLMResponse,
    }

    #[async_trait]
    impl Provider for StubProvider {
        async fn call(&self, _request: LLMRequest) -> Result<LLMResponse> {
            Ok(self.response.clone())
        }

        async fn stream(&self, _request: LLMRequest) -> Result<ChunkStream> {
            unimplemented!("not exercised in call() tests")
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }
    }

    #[tokio::test]
    async fn system_prompt_advisor_skips_when_already_present() {
        let advisor = SystemPromptAdvisor::new(|| Some("rendered".to_string()));
        let request = LLMRequest::new(
            "gpt-4o",
            vec![Message::system("already here"), Message::user("hi")],
        );
        let result = advisor.before_call(request).await;
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].content.as_deref(), Some("already here"));
    }

    #[tokio::test]
    async fn system_prompt_advisor_inserts_when_absent() {
        let advisor = SystemPromptAdvisor::new(|| Some("rendered".to_string()));
        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let result = advisor.before_call(request).await;
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].content.as_deref(), Some("rendered"));
    }

    #[tokio::test]
    async fn finish_task_advisor_adds_tool_definition() {
        let advisor = FinishTaskAdvisor::new(finish_task_definition());
        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let result = advisor.before_call(request).await;
        assert!(result
            .tools
            .unwrap()
            .iter()
            .any(|t| t.name == FINISH_TASK_TOOL_NAME));
    }

    #[tokio::test]
    async fn finish_task_advisor_converts_non_stream_call() {
        let advisor = FinishTaskAdvisor::new(finish_task_definition());
        let response = LLMResponse {
            id: "r1".to_string(),
            model: "gpt-4o".to_string(),
            created: 0,
            message: Message::assistant_with_tool_calls(
                None,
                vec![crate::message::ToolCall::new(
                    "call_1",
                    FINISH_TASK_TOOL_NAME,
                    r#"{"content":"done"}"#,
                )],
            ),
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
        };
        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let converted = advisor.after_call(&request, response).await;
        assert_eq!(converted.message.content.as_deref(), Some("done"));
        assert!(converted.message.tool_calls.is_none());
    }

    #[tokio::test]
    async fn chain_runs_before_in_order_and_after_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        struct Tagging {
            tag: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl Advisor for Tagging {
            async fn before_call(&self, request: LLMRequest) -> LLMRequest {
                self.order.lock().await.push(self.tag);
                request
            }

            async fn after_call(&self, _request: &LLMRequest, response: LLMResponse) -> LLMResponse {
                self.order.lock().await.push(self.tag);
                response
            }
        }

        let chain = AdvisorChain::new(vec![
            Arc::new(Tagging {
                tag: "a",
                order: Arc::clone(&order),
            }),
            Arc::new(Tagging {
                tag: "b",
                order: Arc::clone(&order),
            }),
        ]);

        let provider = StubProvider {
            response: LLMResponse {
                id: "r1".to_string(),
                model: "gpt-4o".to_string(),
                created: 0,
                message: Message::assistant("hi"),
                finish_reason: Some("stop".to_string()),
                usage: None,
            },
        };

        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let _ = chain.call(request, &provider).await.unwrap();
        assert_eq!(*order.lock().await, vec!["a", "b", "b", "a"]);
    }

    #[tokio::test]
    async fn call_error_is_offered_to_advisors_in_reverse() {
        struct Recovering {
            attempts: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Advisor for Recovering {
            async fn on_call_error(
                &self,
                _request: &LLMRequest,
                _error: AgentError,
            ) -> Result<LLMResponse> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Ok(LLMResponse {
                    id: "recovered".to_string(),
                    model: "gpt-4o".to_string(),
                    created: 0,
                    message: Message::assistant("recovered"),
                    finish_reason: Some("stop".to_string()),
                    usage: None,
                })
            }
        }

        struct Failing;

        #[async_trait]
        impl Provider for Failing {
            async fn call(&self, _request: LLMRequest) -> Result<LLMResponse> {
                Err(AgentError::model("boom"))
            }

            async fn stream(&self, _request: LLMRequest) -> Result<ChunkStream> {
                unimplemented!()
            }

            fn capabilities(&self) -> ProviderCapabilities {
                ProviderCapabilities::default()
            }
        }

        let attempts = Arc::new(AtomicUsize::new(0));
        let chain = AdvisorChain::new(vec![Arc::new(Recovering {
            attempts: Arc::clone(&attempts),
        })]);
        let request = LLMRequest::new("gpt-4o", vec![Message::user("hi")]);
        let response = chain.call(request, &Failing).await.unwrap();
        assert_eq!(response.message.content.as_deref(), Some("recovered"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[allow(dead_code)]
    fn unused_delta(index: usize) -> DeltaToolCall {
        DeltaToolCall {
            index,
            id: None,
            function_name: None,
            arguments_fragment: None,
        }
    }

    #[allow(dead_code)]
    fn unused_response_delta() -> ResponseDelta {
        ResponseDelta::default()
    }
}
