//! The stream assembler: folds incremental chunks into messages and events.
//!
//! State lives in an explicit [`StreamContext`] value threaded through the
//! assembler, rather than a global map keyed by a request fingerprint, so a
//! stream's accumulated content and in-flight tool-call fragments stay
//! scoped to the single `assemble()` call driving them.

use serde_json::{json, Value};

use crate::error::Result;
use crate::event_bus::EventBus;
use crate::llm::{ChunkStream, ResponseChunk};
use crate::message::{Message, Role, ToolCall};

/// Event name emitted once per stream, carrying `{}`.
pub const EVENT_MESSAGE_START: &str = "agent.message.start";
/// Event name emitted for every text fragment, carrying `{delta: string}`.
pub const EVENT_MESSAGE_DELTA: &str = "agent.message.delta";
/// Event name emitted once a tool call's name is known, carrying
/// `{tool_name, tool_call_id}`.
pub const EVENT_TOOL_CALL_START: &str = "agent.tool.call.start";
/// Event name emitted once a tool call's arguments are complete, carrying
/// `{tool_name, tool_call_id, arguments}`.
pub const EVENT_TOOL_CALL_READY: &str = "agent.tool.call.ready";
/// Event name emitted once per stream, carrying the reconstructed response.
pub const EVENT_MESSAGE_STOP: &str = "agent.message.stop";

#[derive(Debug, Default, Clone)]
struct AccumulatingToolCall {
    id: String,
    function_name: String,
    arguments: String,
    name_announced: bool,
}

/// Per-request assembler state. Built fresh for each `stream()` call and
/// dropped at stream end or on error — never shared across requests.
#[derive(Debug, Default)]
pub struct StreamContext {
    full_content: String,
    tool_calls: Vec<(usize, AccumulatingToolCall)>,
}

impl StreamContext {
    /// A fresh, empty assembler state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tool_call_mut(&mut self, index: usize) -> &mut AccumulatingToolCall {
        if let Some(pos) = self.tool_calls.iter().position(|(i, _)| *i == index) {
            &mut self.tool_calls[pos].1
        } else {
            self.tool_calls.push((index, AccumulatingToolCall::default()));
            &mut self.tool_calls.last_mut().expect("just pushed").1
        }
    }

    /// Fold `chunk` into this context, publishing `agent.message.delta` and
    /// `agent.tool.call.start` events as content and tool-call fragments
    /// arrive. Returns the final [`Message`] once `chunk.finish_reason` is
    /// non-null, after publishing `agent.tool.call.ready` for every
    /// accumulated call.
    pub async fn fold(&mut self, chunk: &ResponseChunk, event_bus: &EventBus) -> Option<Message> {
        if let Some(content) = &chunk.delta.content {
            self.full_content.push_str(content);
            event_bus
                .emit(EVENT_MESSAGE_DELTA, json!({"delta": content}))
                .await;
        }

        if let Some(tool_calls) = &chunk.delta.tool_calls {
            for delta in tool_calls {
                let is_new = !self.tool_calls.iter().any(|(i, _)| *i == delta.index);
                let entry = self.tool_call_mut(delta.index);
                if is_new {
                    if let Some(id) = &delta.id {
                        entry.id.clone_from(id);
                    }
                }
                if let Some(name) = &delta.function_name {
                    entry.function_name.clone_from(name);
                }
                if let Some(fragment) = &delta.arguments_fragment {
                    entry.arguments.push_str(fragment);
                }
                if !entry.name_announced && !entry.function_name.is_empty() {
                    entry.name_announced = true;
                    event_bus
                        .emit(
                            EVENT_TOOL_CALL_START,
                            json!({"tool_name": entry.function_name, "tool_call_id": entry.id}),
                        )
                        .await;
                }
            }
        }

        if chunk.finish_reason.is_none() {
            return None;
        }

        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .iter()
            .map(|(_, call)| {
                ToolCall::new(call.id.clone(), call.function_name.clone(), call.arguments.clone())
            })
            .collect();

        for call in &tool_calls {
            let arguments = call.parse_arguments().unwrap_or(Value::Null);
            event_bus
                .emit(
                    EVENT_TOOL_CALL_READY,
                    json!({
                        "tool_name": call.function_name,
                        "tool_call_id": call.id,
                        "arguments": arguments,
                    }),
                )
                .await;
        }

        let content = if self.full_content.is_empty() {
            None
        } else {
            Some(self.full_content.clone())
        };

        let message = if tool_calls.is_empty() {
            Message {
                role: Role::Assistant,
                content,
                tool_calls: None,
                tool_call_id: None,
            }
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        };

        Some(message)
    }
}

/// Consume `stream`, folding every chunk through a fresh [`StreamContext`],
/// publishing `agent.message.start`/`.delta`/`.stop` and
/// `agent.tool.call.start`/`.ready` on `event_bus`, and returning the
/// synthetic assistant message reconstructed at the end.
///
/// # Errors
///
/// Propagates the first error yielded by `stream`.
pub async fn assemble(mut stream: ChunkStream, event_bus: &EventBus) -> Result<Message> {
    use futures::StreamExt;

    event_bus.emit(EVENT_MESSAGE_START, json!({})).await;
    let mut context = StreamContext::new();
    let mut final_message = None;

    while let Some(item) = stream.next().await {
        let chunk = item?;
        if let Some(message) = context.fold(&chunk, event_bus).await {
            final_message = Some(message);
            break;
        }
    }

    let message = final_message.unwrap_or_else(|| Message::assistant(String::new()));
    event_bus
        .emit(
            EVENT_MESSAGE_STOP,
            json!({"message": serde_json::to_value(&message).unwrap_or(Value::Null)}),
        )
        .await;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DeltaToolCall, ResponseDelta};

    fn chunk(delta: ResponseDelta, finish: Option<&str>) -> ResponseChunk {
        ResponseChunk {
            id: "resp_1".to_string(),
            model: "gpt-4o".to_string(),
            created: 0,
            delta,
            finish_reason: finish.map(str::to_string),
            usage: None,
        }
    }

    #[tokio::test]
    async fn text_deltas_fold_into_full_content() {
        let bus = EventBus::new();
        let mut context = StreamContext::new();
        let first = context
            .fold(
                &chunk(
                    ResponseDelta {
                        content: Some("hel".to_string()),
                        ..Default::default()
                    },
                    None,
                ),
                &bus,
            )
            .await;
        assert!(first.is_none());

        let message = context
            .fold(
                &chunk(
                    ResponseDelta {
                        content: Some("lo".to_string()),
                        ..Default::default()
                    },
                    Some("stop"),
                ),
                &bus,
            )
            .await
            .expect("finish_reason present");
        assert_eq!(message.content.as_deref(), Some("hello"));
        assert!(message.tool_calls.is_none());
    }

    #[tokio::test]
    async fn tool_call_fragments_accumulate_by_index() {
        let bus = EventBus::new();
        let mut context = StreamContext::new();
        context
            .fold(
                &chunk(
                    ResponseDelta {
                        tool_calls: Some(vec![DeltaToolCall {
                            index: 0,
                            id: Some("call_1".to_string()),
                            function_name: Some("list_files".to_string()),
                            arguments_fragment: Some("{\"dir".to_string()),
                        }]),
                        ..Default::default()
                    },
                    None,
                ),
                &bus,
            )
            .await;

        let message = context
            .fold(
                &chunk(
                    ResponseDelta {
                        tool_calls: Some(vec![DeltaToolCall {
                            index: 0,
                            id: None,
                            function_name: None,
                            arguments_fragment: Some("ectory\":\".\"}".to_string()),
                        }]),
                        ..Default::default()
                    },
                    Some("tool_calls"),
                ),
                &bus,
            )
            .await
            .expect("finish_reason present");

        let calls = message.tool_calls.expect("tool calls present");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "list_files");
        assert_eq!(calls[0].arguments_json_string, "{\"directory\":\".\"}");
    }

    #[tokio::test]
    async fn assemble_runs_stream_to_completion() {
        use futures::stream;

        let bus = EventBus::new();
        let chunks: Vec<Result<ResponseChunk>> = vec![
            Ok(chunk(
                ResponseDelta {
                    content: Some("hi".to_string()),
                    ..Default::default()
                },
                None,
            )),
            Ok(chunk(ResponseDelta::default(), Some("stop"))),
        ];
        let boxed: ChunkStream = Box::pin(stream::iter(chunks));
        let message = assemble(boxed, &bus).await.expect("assembles");
        assert_eq!(message.content.as_deref(), Some("hi"));
    }
}
