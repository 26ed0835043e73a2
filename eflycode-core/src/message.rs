//! The conversation message model.
//!
//! A [`Message`] is the unit of the session log: a system, user, assistant,
//! or tool turn. The shape is deliberately flat — no content-part arrays, no
//! per-provider extensions — because every provider adapter is responsible
//! for translating to and from this shape at its own boundary.

use serde::{Deserialize, Serialize};

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system/instruction message (e.g. the rendered system prompt).
    System,
    /// A user-authored message.
    User,
    /// A model-authored message, optionally carrying tool calls.
    Assistant,
    /// The result of executing one tool call, addressed by `tool_call_id`.
    Tool,
}

impl Role {
    /// The wire string for this role (`"system"`, `"user"`, `"assistant"`, `"tool"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single request for a tool invocation, as carried on an assistant message.
///
/// `arguments_json_string` is kept verbatim rather than parsed: while a tool
/// call is streaming, the arguments arrive fragment-by-fragment and are not
/// valid JSON until the stream finishes. Parsing happens only once, at the
/// point the call is ready to execute (see [`crate::stream`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id for this call, echoed back on the `tool` message
    /// that carries its result.
    pub id: String,
    /// The name of the tool to invoke.
    pub function_name: String,
    /// The raw (not yet parsed) JSON arguments string.
    pub arguments_json_string: String,
}

impl ToolCall {
    /// Build a tool call from already-known, complete fields.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments_json_string: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            arguments_json_string: arguments_json_string.into(),
        }
    }

    /// Parse the accumulated arguments string as JSON.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if the accumulated string
    /// is not valid JSON (e.g. the call is still streaming).
    pub fn parse_arguments(&self) -> serde_json::Result<serde_json::Value> {
        if self.arguments_json_string.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments_json_string)
    }
}

/// One turn of the conversation.
///
/// Invariants (enforced by [`crate::session::Session::add_message`], not by
/// this type): a `tool` message must immediately follow an `assistant`
/// message whose `tool_calls` contains its `tool_call_id`; a `user` message
/// never carries `tool_calls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message.
    pub role: Role,
    /// The text content, absent for assistant messages that are pure tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by the model, present only on assistant messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The id of the tool call this message answers, present only on tool messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Build a plain assistant message (no tool calls).
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Build an assistant message carrying tool calls, with optional accompanying text.
    #[must_use]
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Build a tool-result message answering `tool_call_id`.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// `true` if this is an assistant message with at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_has_no_tool_calls() {
        let msg = Message::system("be helpful");
        assert_eq!(msg.role, Role::System);
        assert!(msg.tool_calls.is_none());
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result("call_1", "a.txt\nb.txt");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        let call = ToolCall::new("call_1", "list_files", "");
        let parsed = call.parse_arguments().expect("empty string is valid");
        assert_eq!(parsed, serde_json::json!({}));
    }

    #[test]
    fn partial_arguments_fail_to_parse() {
        let call = ToolCall::new("call_1", "list_files", "{\"directory\":");
        assert!(call.parse_arguments().is_err());
    }

    #[test]
    fn assistant_with_tool_calls_round_trips_json() {
        let msg = Message::assistant_with_tool_calls(
            None,
            vec![ToolCall::new("call_1", "list_files", "{}")],
        );
        let json = serde_json::to_string(&msg).expect("serializes");
        let back: Message = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(msg, back);
    }
}
