#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(tail_expr_drop_order)]
//! eflycode-core is the execution engine behind an interactive coding agent:
//! a run loop that turns user input into model calls and tool invocations, a
//! hook pipeline that lets external processes gate or observe every step, a
//! context manager that keeps the conversation within the model's window, an
//! event bus that decouples the run loop from whatever is driving it (a CLI,
//! a TUI, a test harness), and the tool catalog the model is allowed to call.
//!
//! Nothing here is tied to a particular model provider or front end: the
//! [`llm::Provider`] trait and the [`tool::Tool`] trait are the seams a host
//! application fills in. [`providers`] ships one real `OpenAI`-compatible
//! HTTP client and one in-memory mock; [`tools`] ships a workspace-confined
//! file-system and shell-command catalog.

pub mod advisor;
pub mod agent;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod hooks;
pub mod ignore;
pub mod llm;
pub mod message;
pub mod providers;
pub mod session;
pub mod stream;
pub mod tokenizer;
pub mod tool;
pub mod tools;

pub use advisor::{Advisor, AdvisorChain, FinishTaskAdvisor, SystemPromptAdvisor};
pub use agent::{Agent, AgentBuilder, AgentState, CancelToken, TaskStatistics};
pub use context::{ContextManager, ContextStrategyConfig, StrategyType};
pub use error::{AgentError, Result, ToolError};
pub use event_bus::{EventBus, Handler, SubscribeOptions, SubscriptionId};
pub use hooks::{HookContext, HookEvent, HookPipeline, HookRegistry};
pub use llm::{LLMRequest, LLMResponse, Provider, ProviderCapabilities};
pub use message::{Message, Role, ToolCall};
pub use session::Session;
pub use tokenizer::Tokenizer;
pub use tool::{Tool, ToolDefinition, ToolPermission, ToolRegistry};
