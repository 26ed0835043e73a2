//! Tool trait, argument coercion, and the tool registry.
//!
//! Tools are the leaves the model may invoke: file-system operations, shell
//! commands, content search. The core is agnostic to the specific catalog
//! (see [`crate::tools`]) — this module only defines the contract every
//! tool satisfies and the machinery (`definition`, coercion, dispatch) that
//! is common to all of them.
//!
//! # OpenAI API Alignment
//!
//! [`ToolDefinition`] itself serializes flat (`name`, `description`,
//! `permission`, `parameters`), symmetric with its `Deserialize`, so an
//! [`crate::llm::LLMRequest`] round-trips through JSON intact. A provider
//! that speaks OpenAI's nested `{"type": "function", "function": {...}}`
//! wire format builds that shape explicitly from a `ToolDefinition`; see
//! `providers::common::to_openai_tool`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::ToolError;

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = Result<T, ToolError>;

/// Type of tool in the OpenAI function-calling API. Only `"function"`
/// exists today; the enum leaves room for future tool kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ToolType {
    /// A function tool defined by JSON schema.
    #[default]
    Function,
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Function => "function",
        })
    }
}

/// What a tool is allowed to do to the workspace, independent of whether a
/// hook additionally gates it. Informational to the host/UI (e.g. to decide
/// whether to prompt for approval) — the core itself does not enforce it;
/// that's the Hook Pipeline's job (`BeforeTool`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    /// Only reads the workspace (e.g. `read_file`, `grep`).
    Read,
    /// Creates or modifies workspace content (e.g. `write_file`, `execute_command`).
    Edit,
    /// Removes workspace content (e.g. `delete_path`).
    Delete,
}

/// Definition of a tool, advertised to the model and used to coerce
/// incoming arguments.
///
/// Serializes flat, symmetrically with its `Deserialize` impl, so an
/// [`crate::llm::LLMRequest`] round-trips through JSON intact. Providers that
/// speak a nested wire shape (e.g. OpenAI's `{"type":"function","function":{...}}`)
/// build that shape explicitly from this type rather than deriving it from
/// `Serialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool (snake_case, e.g. `"list_files"`).
    pub name: String,
    /// What the tool does; helps the model decide when to use it.
    pub description: String,
    /// What the tool is permitted to do to the workspace.
    pub permission: ToolPermission,
    /// JSON-Schema-shaped object (`type: "object"`, `properties`, `required`)
    /// describing the tool's arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        permission: ToolPermission,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            permission,
            parameters,
        }
    }
}

/// Coerce `value` against a JSON-Schema `type` at a single leaf.
///
/// String inputs are converted to the schema's declared scalar type
/// (`integer`, `number`, `boolean`, `string`); objects and arrays are walked
/// recursively against `properties`/`items`. Unknown keys and values that
/// already match the declared type pass through untouched.
fn coerce_value(value: Value, schema: &Value) -> Value {
    let Some(schema_type) = schema.get("type").and_then(Value::as_str) else {
        return value;
    };

    match (schema_type, &value) {
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(value),
        ("number", Value::String(s)) => {
            s.trim().parse::<f64>().map(Value::from).unwrap_or(value)
        }
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value,
        },
        ("object", Value::Object(map)) => {
            let properties = schema.get("properties").and_then(Value::as_object);
            let coerced = map
                .into_iter()
                .map(|(key, val)| {
                    let coerced = properties
                        .and_then(|props| props.get(&key))
                        .map_or(val.clone(), |prop_schema| coerce_value(val, prop_schema));
                    (key, coerced)
                })
                .collect();
            Value::Object(coerced)
        }
        ("array", Value::Array(items)) => {
            let item_schema = schema.get("items");
            let coerced = items
                .into_iter()
                .map(|item| item_schema.map_or_else(|| item.clone(), |s| coerce_value(item, s)))
                .collect();
            Value::Array(coerced)
        }
        _ => value,
    }
}

/// Coerce a full arguments object against a tool's `parameter_schema`,
/// then check that every `required` key is present.
///
/// # Errors
///
/// Returns [`ToolError::ParameterError`] if `arguments` is not a JSON object
/// or a required key is missing after coercion.
pub fn coerce_arguments(
    tool_name: &str,
    arguments: Value,
    schema: &Value,
) -> ToolResult<Value> {
    let coerced = coerce_value(arguments, schema);
    let Value::Object(map) = &coerced else {
        return Err(ToolError::parameter(tool_name, "arguments must be a JSON object"));
    };
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if !map.contains_key(key) {
                return Err(ToolError::parameter(
                    tool_name,
                    format!("missing required argument '{key}'"),
                ));
            }
        }
    }
    Ok(coerced)
}

/// Parse a tool's raw arguments string into a `Value`, treating an empty
/// string as `{}` rather than an error (per spec boundary behavior).
fn parse_arguments_string(raw: &str) -> Value {
    if raw.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(raw).unwrap_or(Value::Null)
    }
}

/// An invokable, schema-described local operation.
///
/// Object-safe so the registry can hold a heterogeneous collection of
/// tools behind `Box<dyn Tool>`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's name, as advertised to the model.
    fn name(&self) -> &str;

    /// What the tool does.
    fn description(&self) -> &str;

    /// What the tool is permitted to do to the workspace.
    fn permission(&self) -> ToolPermission;

    /// JSON-Schema-shaped `{type: "object", properties, required}`.
    fn parameter_schema(&self) -> Value;

    /// Build this tool's [`ToolDefinition`], for advertising to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name(),
            self.description(),
            self.permission(),
            self.parameter_schema(),
        )
    }

    /// Run the tool body against already-coerced arguments.
    ///
    /// Returns plain text: opaque to the core, shown to the model verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ExecutionError`] if the tool body fails.
    async fn run(&self, arguments: Value) -> ToolResult<String>;
}

/// The static registry mapping tool name to descriptor + invoker.
///
/// Populated once at startup (a map, not runtime reflection — argument
/// coercion uses each tool's schema as data). Read-only after construction.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any prior tool of the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// `true` if a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of every registered tool, in arbitrary order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every registered tool, for advertising to the model.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Definitions filtered to `names`, preserving registry iteration order
    /// (used by a `BeforeToolSelection` hook's filtered tool list).
    #[must_use]
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Coerce `raw_arguments_json` against `name`'s schema and invoke the
    /// tool body.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ParameterError`] if the tool is unknown,
    /// arguments fail to coerce, or a required argument is missing.
    /// Returns [`ToolError::ExecutionError`] if the tool body fails.
    pub async fn call(&self, name: &str, raw_arguments_json: &str) -> ToolResult<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::parameter(name, "unknown tool"))?;
        let arguments = parse_arguments_string(raw_arguments_json);
        let schema = tool.parameter_schema();
        let coerced = coerce_arguments(name, arguments, &schema)?;
        tool.run(coerced).await
    }
}
