//! The agent and its run loop.
//!
//! `Agent` carries the provider, session, tool registry, advisor chain, and
//! hook pipeline together and exposes two primitive turns, `chat` and
//! `stream`. [`run`](Agent::run) is the driver on top of those turns: it
//! alternates model calls with tool dispatch until the model calls
//! `finish_task`, the iteration cap is hit, or the job is cancelled.
//!
//! Each call to `run` spawns no dedicated background thread; a task's
//! lifetime is just the lifetime of the `run` future driving it, which keeps
//! cancellation and the busy/idle state machine straightforward.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::advisor::{Advisor, AdvisorChain, FINISH_TASK_TOOL_NAME};
use crate::error::{AgentError, Result};
use crate::event_bus::EventBus;
use crate::hooks::{HookContext, HookEvent, HookPipeline, HookRegistry, HookRunner};
use crate::llm::{GenerateConfig, LLMRequest, LLMResponse, Provider, TokenUsage};
use crate::message::{Message, ToolCall};
use crate::session::Session;
use crate::stream::{self, StreamContext};
use crate::tool::{ToolDefinition, ToolRegistry};

/// Default iteration cap for [`Agent::run`].
pub const DEFAULT_MAX_ITERATIONS: usize = 50;
/// Default token budget passed to the context manager.
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 128_000;

/// Emitted once when [`Agent::run`] begins.
pub const EVENT_TASK_START: &str = "agent.task.start";
/// Emitted once when [`Agent::run`] returns, carrying `{result}`.
pub const EVENT_TASK_STOP: &str = "agent.task.stop";
/// Emitted when a fatal (provider or hook-policy) error ends the task.
pub const EVENT_TASK_ERROR: &str = "agent.task.error";
/// Emitted before a tool body runs.
pub const EVENT_TOOL_CALL: &str = "agent.tool.call";
/// Emitted after a tool body returns successfully.
pub const EVENT_TOOL_RESULT: &str = "agent.tool.result";
/// Emitted when a tool call is denied by a hook or fails.
pub const EVENT_TOOL_ERROR: &str = "agent.tool.error";

/// A one-bit, thread-safe cancellation flag shared between the controller
/// that owns a job and the run-loop worker executing it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// `true` once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of one [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No job running.
    Idle,
    /// A job is running normally.
    Running,
    /// Ctrl-C (or equivalent) requested; the current job's cancel token is set.
    Interrupting,
    /// Explicit shutdown requested; the event bus is draining.
    Stopping,
    /// The agent will accept no further jobs.
    Stopped,
}

/// Token accounting and loop bookkeeping accumulated over one [`Agent::run`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStatistics {
    /// Number of run-loop iterations taken.
    pub iterations: usize,
    /// Number of tools successfully dispatched (excludes `finish_task`).
    pub tool_calls_count: usize,
    /// Summed prompt tokens across every model call this task made.
    pub prompt_tokens: u64,
    /// Summed completion tokens across every model call this task made.
    pub completion_tokens: u64,
    /// Summed total tokens across every model call this task made.
    pub total_tokens: u64,
}

impl TaskStatistics {
    fn record_usage(&mut self, usage: TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }
}

/// The outcome of [`Agent::run`]: the final session snapshot, the task's
/// terminal result text, and the accumulated statistics.
#[derive(Debug, Clone)]
pub struct TaskConversation {
    /// The session's message log at the moment the task ended.
    pub messages: Vec<Message>,
    /// The final assistant text (or a sentinel like `"cancelled"`).
    pub result: String,
    /// Accumulated token/iteration/tool-call bookkeeping.
    pub statistics: TaskStatistics,
}

/// One model turn: the resulting message, plus usage if the provider reported it.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    /// The assistant message produced by this turn.
    pub message: Message,
    /// Token accounting for this turn, if the provider reported it.
    pub usage: Option<TokenUsage>,
}

/// Owns a provider, a session, a tool registry, an advisor chain, and a hook
/// pipeline, and exposes the two primitive model turns plus the run loop.
pub struct Agent {
    model: String,
    provider: Arc<dyn Provider>,
    event_bus: EventBus,
    session: Mutex<Session>,
    tools: ToolRegistry,
    advisors: AdvisorChain,
    hooks: HookPipeline,
    max_context_length: usize,
    max_iterations: usize,
    state: RwLock<AgentState>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model)
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent for `model`, calling out to `provider`.
    #[must_use]
    pub fn builder(model: impl Into<String>, provider: Arc<dyn Provider>) -> AgentBuilder {
        AgentBuilder::new(model, provider)
    }

    /// The agent's current lifecycle state.
    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    /// The message log of the underlying session, at the time of the call.
    pub async fn messages(&self) -> Vec<Message> {
        self.session.lock().await.get_messages().to_vec()
    }

    /// Enter `Interrupting` and set `cancel`: the run loop notices at its
    /// next iteration or chunk boundary, unwinds with a `"cancelled"`
    /// result, and returns to `Idle` on its own.
    pub async fn interrupt(&self, cancel: &CancelToken) {
        self.set_state(AgentState::Interrupting).await;
        cancel.cancel();
    }

    /// Enter `Stopping`: no further jobs will be accepted once the current
    /// one (if any) returns. Callers drain and close the event bus
    /// themselves afterward.
    pub async fn request_stop(&self) {
        self.set_state(AgentState::Stopping).await;
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.write().await = state;
    }

    async fn append_user_text(&self, text: Option<String>) {
        if let Some(text) = text {
            if !text.is_empty() {
                self.session.lock().await.add_message(Message::user(text));
            }
        }
    }

    async fn append_tool_message(&self, tool_call_id: &str, content: String) {
        self.session
            .lock()
            .await
            .add_message(Message::tool_result(tool_call_id, content));
    }

    async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let definitions = self.tools.definitions();
        let mut event_data = Map::new();
        if let Ok(value) = serde_json::to_value(&definitions) {
            event_data.insert("tools".to_string(), value);
        }
        let aggregated = self
            .hooks
            .fire(HookEvent::BeforeToolSelection, None, event_data)
            .await;
        let Some(output) = aggregated.hook_specific_output else {
            return definitions;
        };
        let Some(Value::Array(names)) = output.get("tools") else {
            return definitions;
        };
        let filtered: Vec<String> = names.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        if filtered.is_empty() {
            definitions
        } else {
            self.tools.definitions_for(&filtered)
        }
    }

    async fn build_request(&self) -> LLMRequest {
        let definitions = self.tool_definitions().await;
        let request = {
            let session = self.session.lock().await;
            session
                .get_context(&self.model, self.max_context_length, Some(self.provider.as_ref()))
                .await
        };
        request.with_tools(definitions)
    }

    async fn apply_before_model_hook(&self, request: LLMRequest) -> Result<LLMRequest> {
        let mut event_data = Map::new();
        if let Ok(value) = serde_json::to_value(&request) {
            event_data.insert("llm_request".to_string(), value);
        }
        let aggregated = self.hooks.fire(HookEvent::BeforeModel, None, event_data).await;
        if !aggregated.continue_ || matches!(aggregated.decision.as_deref(), Some("block") | Some("deny")) {
            return Err(AgentError::HookPolicy {
                message: aggregated
                    .system_message()
                    .unwrap_or_else(|| "blocked by hook".to_string()),
            });
        }
        if let Some(output) = aggregated.hook_specific_output {
            if let Some(replacement) = output.get("llm_request") {
                match Self::parse_request_leniently(replacement) {
                    Some(parsed) => return Ok(parsed),
                    None => {
                        tracing::warn!(
                            "BeforeModel hook's replacement llm_request had no valid messages; keeping original request"
                        );
                    }
                }
            }
        }
        Ok(request)
    }

    /// Parse a hook-supplied replacement request, tolerating malformed
    /// individual messages: each element of `messages` is deserialized on
    /// its own, a bad element is skipped with a warning, and the whole
    /// replacement is rejected only if zero messages survive.
    fn parse_request_leniently(value: &Value) -> Option<LLMRequest> {
        let model = value.get("model")?.as_str()?.to_string();
        let raw_messages = value.get("messages")?.as_array()?;

        let mut messages = Vec::with_capacity(raw_messages.len());
        for (index, raw_message) in raw_messages.iter().enumerate() {
            match serde_json::from_value::<Message>(raw_message.clone()) {
                Ok(message) => messages.push(message),
                Err(error) => {
                    tracing::warn!(
                        index,
                        %error,
                        "skipping malformed message in BeforeModel hook's replacement request"
                    );
                }
            }
        }
        if messages.is_empty() {
            return None;
        }

        let tools = value
            .get("tools")
            .and_then(|v| serde_json::from_value::<Vec<ToolDefinition>>(v.clone()).ok());
        let generate_config = value
            .get("generate_config")
            .and_then(|v| serde_json::from_value::<GenerateConfig>(v.clone()).ok());

        Some(LLMRequest {
            model,
            messages,
            tools,
            generate_config,
        })
    }

    async fn fire_after_model(&self, request: &LLMRequest, message: &Message) {
        let mut event_data = Map::new();
        if let Ok(value) = serde_json::to_value(request) {
            event_data.insert("llm_request".to_string(), value);
        }
        if let Ok(value) = serde_json::to_value(message) {
            event_data.insert("llm_response".to_string(), value);
        }
        let _ = self.hooks.fire(HookEvent::AfterModel, None, event_data).await;
    }

    /// Add `text` as a user message (if present), send the session's request
    /// through the advisor chain, and append the resulting assistant message
    /// to the session.
    ///
    /// # Errors
    ///
    /// Propagates a provider error unrecovered by any advisor, or an
    /// [`AgentError::HookPolicy`] if a `BeforeModel` hook blocks the turn.
    pub async fn chat(&self, text: Option<String>) -> Result<AgentTurn> {
        self.append_user_text(text).await;
        let request = self.build_request().await;
        let request = self.apply_before_model_hook(request).await?;
        let response: LLMResponse = self.advisors.call(request.clone(), self.provider.as_ref()).await?;
        self.fire_after_model(&request, &response.message).await;
        self.session.lock().await.add_message(response.message.clone());
        Ok(AgentTurn {
            message: response.message,
            usage: response.usage,
        })
    }

    /// Same contract as [`Agent::chat`], but streams the response live via
    /// the Stream Assembler, checking `cancel` between chunks.
    ///
    /// # Errors
    ///
    /// Propagates a provider error unrecovered by any advisor, or an
    /// [`AgentError::HookPolicy`] if a `BeforeModel` hook blocks the turn.
    pub async fn stream(&self, text: Option<String>, cancel: &CancelToken) -> Result<AgentTurn> {
        self.append_user_text(text).await;
        let request = self.build_request().await;
        let request = self.apply_before_model_hook(request).await?;
        let chunk_stream = Arc::new(self.advisors.clone())
            .stream(request.clone(), Arc::clone(&self.provider))
            .await?;
        let message = self.fold_stream(chunk_stream, cancel).await?;
        self.fire_after_model(&request, &message).await;
        self.session.lock().await.add_message(message.clone());
        Ok(AgentTurn { message, usage: None })
    }

    async fn fold_stream(&self, mut chunk_stream: crate::llm::ChunkStream, cancel: &CancelToken) -> Result<Message> {
        use futures::StreamExt;

        self.event_bus.emit(stream::EVENT_MESSAGE_START, json!({})).await;
        let mut context = StreamContext::new();
        let mut final_message = None;

        while let Some(item) = chunk_stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            let chunk = item?;
            if let Some(message) = context.fold(&chunk, &self.event_bus).await {
                final_message = Some(message);
                break;
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        let message = final_message.unwrap_or_else(|| Message::assistant(String::new()));
        self.event_bus
            .emit(
                stream::EVENT_MESSAGE_STOP,
                json!({"message": serde_json::to_value(&message).unwrap_or(Value::Null)}),
            )
            .await;
        Ok(message)
    }

    async fn stream_finish_task_content(&self, content: &str, cancel: &CancelToken) {
        const CHUNK_CHARS: usize = 20;
        const CHUNK_DELAY: Duration = Duration::from_millis(50);

        let chars: Vec<char> = content.chars().collect();
        let mut index = 0;
        while index < chars.len() {
            if cancel.is_cancelled() {
                break;
            }
            let end = (index + CHUNK_CHARS).min(chars.len());
            let piece: String = chars[index..end].iter().collect();
            self.event_bus
                .emit(stream::EVENT_MESSAGE_DELTA, json!({"delta": piece}))
                .await;
            index = end;
            if index < chars.len() {
                tokio::time::sleep(CHUNK_DELAY).await;
            }
        }
        self.event_bus
            .emit(
                stream::EVENT_MESSAGE_STOP,
                json!({
                    "message": serde_json::to_value(&Message::assistant(content.to_string()))
                        .unwrap_or(Value::Null),
                }),
            )
            .await;
    }

    async fn dispatch_tool(&self, tool_call: &ToolCall) -> std::result::Result<String, String> {
        let arguments = tool_call.parse_arguments().unwrap_or(Value::Null);
        self.event_bus
            .emit(
                EVENT_TOOL_CALL,
                json!({
                    "tool_name": tool_call.function_name,
                    "tool_call_id": tool_call.id,
                    "arguments": arguments,
                }),
            )
            .await;

        let mut before_data = Map::new();
        before_data.insert("tool_name".to_string(), Value::String(tool_call.function_name.clone()));
        before_data.insert("tool_input".to_string(), arguments);
        let before = self
            .hooks
            .fire(HookEvent::BeforeTool, Some(&tool_call.function_name), before_data)
            .await;

        if !before.continue_ || matches!(before.decision.as_deref(), Some("block") | Some("deny")) {
            let error = crate::error::ToolError::hook_policy(
                &tool_call.function_name,
                before.system_message().unwrap_or_default(),
            );
            let message = error.to_model_message();
            self.event_bus
                .emit(
                    EVENT_TOOL_ERROR,
                    json!({
                        "tool_name": tool_call.function_name,
                        "tool_call_id": tool_call.id,
                        "message": message,
                    }),
                )
                .await;
            return Err(message);
        }

        let result = self
            .tools
            .call(&tool_call.function_name, &tool_call.arguments_json_string)
            .await;

        let mut after_data = Map::new();
        after_data.insert("tool_name".to_string(), Value::String(tool_call.function_name.clone()));
        after_data.insert(
            "tool_result".to_string(),
            Value::String(match &result {
                Ok(text) => text.clone(),
                Err(err) => err.to_model_message(),
            }),
        );
        self.hooks
            .fire(HookEvent::AfterTool, Some(&tool_call.function_name), after_data)
            .await;

        match result {
            Ok(text) => {
                self.event_bus
                    .emit(
                        EVENT_TOOL_RESULT,
                        json!({
                            "tool_name": tool_call.function_name,
                            "tool_call_id": tool_call.id,
                            "result": text,
                        }),
                    )
                    .await;
                Ok(text)
            }
            Err(err) => {
                let message = err.to_model_message();
                self.event_bus
                    .emit(
                        EVENT_TOOL_ERROR,
                        json!({
                            "tool_name": tool_call.function_name,
                            "tool_call_id": tool_call.id,
                            "message": message,
                        }),
                    )
                    .await;
                Err(message)
            }
        }
    }

    async fn snapshot(&self, result: String, statistics: TaskStatistics) -> TaskConversation {
        TaskConversation {
            messages: self.session.lock().await.get_messages().to_vec(),
            result,
            statistics,
        }
    }

    /// Drive the run loop: alternate model turns with tool dispatch until
    /// the model calls `finish_task`, the iteration cap (`max_iterations`)
    /// is reached, the job is cancelled via `cancel`, or a fatal error ends
    /// the task.
    ///
    /// # Errors
    ///
    /// This call itself never returns `Err`: fatal provider/hook errors are
    /// caught, turned into an `agent.task.error` event, and folded into the
    /// returned [`TaskConversation`]'s `result`.
    pub async fn run(&self, user_input: Option<String>, stream: bool, cancel: &CancelToken) -> Result<TaskConversation> {
        match self.state().await {
            AgentState::Running | AgentState::Interrupting => {
                return Ok(self.snapshot("busy, please wait".to_string(), TaskStatistics::default()).await);
            }
            AgentState::Stopping | AgentState::Stopped => {
                return Ok(self.snapshot("agent is shutting down".to_string(), TaskStatistics::default()).await);
            }
            AgentState::Idle => {}
        }
        self.set_state(AgentState::Running).await;
        self.event_bus.emit(EVENT_TASK_START, json!({})).await;

        let mut statistics = TaskStatistics::default();
        let mut pending_input = user_input;

        let outcome = loop {
            if cancel.is_cancelled() {
                break "cancelled".to_string();
            }
            if statistics.iterations >= self.max_iterations {
                break "max iterations reached".to_string();
            }
            statistics.iterations += 1;

            let turn = if stream {
                self.stream(pending_input.take(), cancel).await
            } else {
                self.chat(pending_input.take()).await
            };

            let turn = match turn {
                Ok(turn) => turn,
                Err(error) => {
                    self.event_bus
                        .emit(EVENT_TASK_ERROR, json!({"message": error.to_string()}))
                        .await;
                    let conversation = self.snapshot(error.to_string(), statistics).await;
                    self.set_state(AgentState::Idle).await;
                    return Ok(conversation);
                }
            };

            if let Some(usage) = turn.usage {
                statistics.record_usage(usage);
            }

            if cancel.is_cancelled() {
                break "cancelled".to_string();
            }

            let Some(tool_call) = turn.message.tool_calls.as_ref().and_then(|calls| calls.first()).cloned() else {
                let result = turn.message.content.clone().unwrap_or_default();
                self.event_bus
                    .emit(EVENT_TASK_STOP, json!({"result": result}))
                    .await;
                let conversation = self.snapshot(result, statistics).await;
                self.set_state(AgentState::Idle).await;
                return Ok(conversation);
            };

            if tool_call.function_name == FINISH_TASK_TOOL_NAME {
                self.append_tool_message(&tool_call.id, String::new()).await;
                let content = tool_call
                    .parse_arguments()
                    .ok()
                    .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(str::to_string))
                    .unwrap_or_default();
                self.stream_finish_task_content(&content, cancel).await;
                self.event_bus
                    .emit(EVENT_TASK_STOP, json!({"result": content}))
                    .await;
                let conversation = self.snapshot(content, statistics).await;
                self.set_state(AgentState::Idle).await;
                return Ok(conversation);
            }

            match self.dispatch_tool(&tool_call).await {
                Ok(result_text) => {
                    statistics.tool_calls_count += 1;
                    self.append_tool_message(&tool_call.id, result_text.clone()).await;
                    self.append_user_text(Some(format!(
                        "The tool {} produced: {result_text}\nPlease continue.",
                        tool_call.function_name
                    )))
                    .await;
                }
                Err(message) => {
                    self.append_tool_message(&tool_call.id, message.clone()).await;
                    self.append_user_text(Some(format!(
                        "The tool {} produced: {message}\nPlease continue.",
                        tool_call.function_name
                    )))
                    .await;
                }
            }
        };

        self.event_bus
            .emit(EVENT_TASK_STOP, json!({"result": outcome}))
            .await;
        let conversation = self.snapshot(outcome, statistics).await;
        self.set_state(AgentState::Idle).await;
        Ok(conversation)
    }
}

/// Builds an [`Agent`], filling in sensible defaults for everything but
/// `model` and `provider`.
pub struct AgentBuilder {
    model: String,
    provider: Arc<dyn Provider>,
    event_bus: EventBus,
    session: Session,
    tools: ToolRegistry,
    advisors: Vec<Arc<dyn Advisor>>,
    hooks: HookPipeline,
    max_context_length: usize,
    max_iterations: usize,
}

impl AgentBuilder {
    /// Start from `model`/`provider`; an empty session, an empty tool
    /// registry, no advisors, a no-op hook pipeline, a fresh event bus, and
    /// the default context length and iteration cap.
    #[must_use]
    pub fn new(model: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            model: model.into(),
            provider,
            event_bus: EventBus::new(),
            session: Session::new(),
            tools: ToolRegistry::new(),
            advisors: Vec::new(),
            hooks: HookPipeline::new(
                HookRegistry::new(),
                HookRunner::new(HookContext {
                    session_id: Some(uuid::Uuid::new_v4().to_string()),
                    workspace_dir: std::env::current_dir().unwrap_or_default(),
                    cli_version: env!("CARGO_PKG_VERSION").to_string(),
                }),
            ),
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Use a pre-populated session (e.g. one with a configured compression strategy).
    #[must_use]
    pub fn session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Use a pre-populated tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the ordered advisor list.
    #[must_use]
    pub fn advisors(mut self, advisors: Vec<Arc<dyn Advisor>>) -> Self {
        self.advisors = advisors;
        self
    }

    /// Use a pre-populated hook pipeline.
    #[must_use]
    pub fn hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use a shared event bus (e.g. one the UI has already subscribed to).
    #[must_use]
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Override the context manager's token budget.
    #[must_use]
    pub fn max_context_length(mut self, max_context_length: usize) -> Self {
        self.max_context_length = max_context_length;
        self
    }

    /// Override the run loop's iteration cap.
    #[must_use]
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Build the agent.
    #[must_use]
    pub fn build(self) -> Agent {
        Agent {
            model: self.model,
            provider: self.provider,
            event_bus: self.event_bus,
            session: Mutex::new(self.session),
            tools: self.tools,
            advisors: AdvisorChain::new(self.advisors),
            hooks: self.hooks,
            max_context_length: self.max_context_length,
            max_iterations: self.max_iterations,
            state: RwLock::new(AgentState::Idle),
        }
    }
}
