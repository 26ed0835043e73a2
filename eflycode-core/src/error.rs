//! Error types for the agent execution engine.
//!
//! This module defines all error types used throughout the crate,
//! providing rich error context for debugging and error handling.

use std::fmt;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// The main error type for agent operations.
#[derive(Debug)]
pub enum AgentError {
    /// Error during tool execution.
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// Error parsing model output.
    Parsing {
        /// The output that failed to parse.
        output: String,
        /// The parsing error message.
        message: String,
    },

    /// Error from the model/LLM.
    Model {
        /// The underlying error message.
        message: String,
    },

    /// Agent reached maximum number of steps.
    MaxSteps {
        /// Number of steps taken.
        steps: usize,
        /// Maximum allowed steps.
        max_steps: usize,
    },

    /// Agent execution was interrupted.
    Interrupted,

    /// Invalid configuration.
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// A hook returned a blocking decision outside of tool execution
    /// (`BeforeAgent`/`BeforeModel`); the turn is aborted with a
    /// user-visible message.
    HookPolicy {
        /// The hook-reported reason the turn was aborted.
        message: String,
    },

    /// HTTP/network error.
    Http {
        /// The underlying error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    Json {
        /// The underlying error message.
        message: String,
    },

    /// Generic internal error.
    Internal {
        /// The underlying error message.
        message: String,
    },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolExecution { tool_name, message } => {
                write!(f, "Tool execution error in '{tool_name}': {message}")
            }
            Self::Parsing { output, message } => {
                write!(f, "Parsing error: {message}. Output: {output}")
            }
            Self::Model { message } => {
                write!(f, "Model error: {message}")
            }
            Self::MaxSteps { steps, max_steps } => {
                write!(f, "Reached maximum steps ({steps}/{max_steps})")
            }
            Self::Interrupted => {
                write!(f, "Agent execution was interrupted")
            }
            Self::Configuration { message } => {
                write!(f, "Configuration error: {message}")
            }
            Self::HookPolicy { message } => {
                write!(f, "Blocked by hook: {message}")
            }
            Self::Http { message } => {
                write!(f, "HTTP error: {message}")
            }
            Self::Json { message } => {
                write!(f, "JSON error: {message}")
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {message}")
            }
        }
    }
}

impl std::error::Error for AgentError {}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl AgentError {
    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new parsing error.
    #[must_use]
    pub fn parsing(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parsing {
            output: output.into(),
            message: message.into(),
        }
    }

    /// Create a new model error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a new max steps error.
    #[must_use]
    pub const fn max_steps(steps: usize, max_steps: usize) -> Self {
        Self::MaxSteps { steps, max_steps }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::ParameterError { tool_name, message } => Self::ToolExecution {
                tool_name,
                message,
            },
            ToolError::ExecutionError {
                tool_name,
                message,
                cause,
            } => Self::ToolExecution {
                tool_name,
                message: cause.map_or_else(|| message.clone(), |cause| format!("{message}: {cause}")),
            },
        }
    }
}

/// Error raised by the tool registry or by a tool body.
///
/// This is the two-kind taxonomy the Run Loop distinguishes from the wider
/// [`AgentError`] taxonomy: both kinds are non-fatal to the task — the Run
/// Loop feeds their message back to the model as the tool result and
/// continues the turn.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Argument coercion against the tool's schema failed, or a required
    /// argument was missing.
    ParameterError {
        /// Name of the tool whose arguments failed to coerce.
        tool_name: String,
        /// Description of what was wrong with the arguments.
        message: String,
    },
    /// The tool body (or the subprocess it spawned) failed while running.
    ExecutionError {
        /// Name of the tool that failed.
        tool_name: String,
        /// A human-readable description of the failure.
        message: String,
        /// The underlying cause, if one was captured (e.g. a hook's
        /// `system_message`, or a subprocess's stderr).
        cause: Option<String>,
    },
}

impl ToolError {
    /// Build a [`ToolError::ParameterError`].
    #[must_use]
    pub fn parameter(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParameterError {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Build a [`ToolError::ExecutionError`] with no separate cause.
    #[must_use]
    pub fn execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionError {
            tool_name: tool_name.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Build a [`ToolError::ExecutionError`] carrying a hook's `system_message`
    /// as the reason a `BeforeTool` hook blocked or denied the call.
    #[must_use]
    pub fn hook_policy(tool_name: impl Into<String>, system_message: impl Into<String>) -> Self {
        let system_message = system_message.into();
        Self::ExecutionError {
            tool_name: tool_name.into(),
            message: format!("blocked by hook: {system_message}"),
            cause: Some(system_message),
        }
    }

    /// The message to feed back to the model as the tool's result.
    #[must_use]
    pub fn to_model_message(&self) -> String {
        match self {
            Self::ParameterError { message, .. } => format!("parameter error: {message}"),
            Self::ExecutionError { message, .. } => format!("execution error: {message}"),
        }
    }

    /// The name of the tool this error came from.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::ParameterError { tool_name, .. } | Self::ExecutionError { tool_name, .. } => {
                tool_name
            }
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError { tool_name, message } => {
                write!(f, "parameter error in '{tool_name}': {message}")
            }
            Self::ExecutionError {
                tool_name,
                message,
                cause,
            } => {
                write!(f, "execution error in '{tool_name}': {message}")?;
                if let Some(cause) = cause {
                    write!(f, " (cause: {cause})")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ToolError {}
