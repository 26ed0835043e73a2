//! The hook pipeline: external commands intercepting every model/tool call.
//!
//! Command strings use an explicit `${EFLYCODE_*}` placeholder syntax rather
//! than bare `$KEY` substitution, so a hook script can't accidentally expand
//! an unrelated environment variable it didn't ask for (see `DESIGN.md`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// The lifecycle points the pipeline intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Fired once when a session begins.
    SessionStart,
    /// Fired once when a session ends.
    SessionEnd,
    /// Fired before the agent begins a turn.
    BeforeAgent,
    /// Fired after the agent completes a turn.
    AfterAgent,
    /// Fired before a model call.
    BeforeModel,
    /// Fired after a model call.
    AfterModel,
    /// Fired before the advertised tool list is sent to the model.
    BeforeToolSelection,
    /// Fired before a tool executes.
    BeforeTool,
    /// Fired after a tool executes.
    AfterTool,
    /// Fired before the context manager compresses the conversation.
    PreCompress,
    /// Fired for ad hoc user-visible notifications.
    Notification,
}

impl HookEvent {
    /// The wire name used in the hook's stdin payload (`hook_event_name`)
    /// and the configuration's `hooks.<event_name>` table key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::BeforeAgent => "BeforeAgent",
            Self::AfterAgent => "AfterAgent",
            Self::BeforeModel => "BeforeModel",
            Self::AfterModel => "AfterModel",
            Self::BeforeToolSelection => "BeforeToolSelection",
            Self::BeforeTool => "BeforeTool",
            Self::AfterTool => "AfterTool",
            Self::PreCompress => "PreCompress",
            Self::Notification => "Notification",
        }
    }
}

/// One external command invoked at a hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHook {
    /// Name used for logging and in aggregated results.
    pub name: String,
    /// Shell command string, with `${EFLYCODE_*}` placeholders expanded
    /// before execution.
    pub command: String,
    /// Timeout in milliseconds. Default 60 000.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Matcher (regex or glob) over a tool name; `None`/`"*"` matches any.
    #[serde(default)]
    pub matcher: Option<String>,
}

const fn default_timeout_ms() -> u64 {
    60_000
}

impl CommandHook {
    /// `true` if `tool_name` satisfies this hook's own matcher.
    #[must_use]
    pub fn matches_tool(&self, tool_name: &str) -> bool {
        matches_tool(self.matcher.as_deref(), tool_name)
    }
}

/// A set of hooks sharing a matcher and parallel/sequential policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookGroup {
    /// Matcher over a tool name gating the whole group; `None`/`"*"` matches any.
    #[serde(default)]
    pub matcher: Option<String>,
    /// `true` to run hooks in declaration order, feeding output forward;
    /// `false` (default) to run them in parallel.
    #[serde(default)]
    pub sequential: bool,
    /// The hooks in this group.
    #[serde(default)]
    pub hooks: Vec<CommandHook>,
}

impl HookGroup {
    /// `true` if `tool_name` satisfies this group's own matcher.
    #[must_use]
    pub fn matches_tool(&self, tool_name: &str) -> bool {
        matches_tool(self.matcher.as_deref(), tool_name)
    }
}

fn matches_tool(matcher: Option<&str>, tool_name: &str) -> bool {
    let Some(matcher) = matcher else { return true };
    if matcher.is_empty() || matcher == "*" {
        return true;
    }
    if let Ok(re) = Regex::new(&format!("^(?:{matcher})")) {
        return re.is_match(tool_name);
    }
    glob::Pattern::new(matcher).is_ok_and(|p| p.matches(tool_name))
}

/// Registry of `event -> ordered list of HookGroups`, populated from
/// configuration and consulted by [`HookPipeline`].
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    groups: HashMap<HookEvent, Vec<HookGroup>>,
}

impl HookRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group of hooks for `event`, appended after any already
    /// registered for that event.
    pub fn register(&mut self, event: HookEvent, group: HookGroup) {
        self.groups.entry(event).or_default().push(group);
    }

    /// The groups registered for `event`, in registration order.
    #[must_use]
    pub fn groups_for(&self, event: HookEvent) -> &[HookGroup] {
        self.groups.get(&event).map_or(&[], Vec::as_slice)
    }
}

/// One hook's raw execution outcome, before JSON interpretation.
#[derive(Debug, Clone)]
pub struct HookExecutionResult {
    /// The hook's configured name.
    pub hook_name: String,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Process exit code (124 on timeout, a synthetic value).
    pub exit_code: i32,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

impl HookExecutionResult {
    /// `true` if `exit_code == 0`.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `true` if `exit_code == 2` (hard block).
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        self.exit_code == 2
    }

    /// `true` if the exit code is nonzero and not a hard block.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        self.exit_code != 0 && self.exit_code != 2
    }
}

/// A hook's stdout, parsed as JSON where possible.
#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    /// `allow`/`ask`/`deny`/`block`, if reported.
    pub decision: Option<String>,
    /// `false` to abort the current turn. Defaults to `true`.
    pub continue_: bool,
    /// A message to surface to the user.
    pub system_message: Option<String>,
    /// Event-specific output (e.g. a replacement `llm_request`).
    pub hook_specific_output: Option<Map<String, Value>>,
}

impl HookOutput {
    /// Parse a hook's stdout. Invalid JSON yields the entire string as
    /// `system_message` with `decision=None, continue_=true` — never an
    /// error.
    #[must_use]
    pub fn from_stdout(stdout: &str) -> Self {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Self {
                continue_: true,
                ..Self::default()
            };
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Self {
                decision: map.get("decision").and_then(Value::as_str).map(str::to_string),
                continue_: map.get("continue").and_then(Value::as_bool).unwrap_or(true),
                system_message: map
                    .get("systemMessage")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                hook_specific_output: map
                    .get("hookSpecificOutput")
                    .and_then(Value::as_object)
                    .cloned(),
            },
            _ => Self {
                continue_: true,
                system_message: Some(stdout.to_string()),
                ..Self::default()
            },
        }
    }
}

fn decision_priority(decision: Option<&str>) -> u8 {
    match decision {
        Some("block") => 4,
        Some("deny") => 3,
        Some("ask") => 2,
        Some("allow") => 1,
        _ => 0,
    }
}

/// The folded outcome of running every matching hook for one event.
#[derive(Debug, Clone, Default)]
pub struct AggregatedHookResult {
    /// The highest-priority decision seen (`block > deny > ask > allow`).
    pub decision: Option<String>,
    /// `false` if any hook blocked or explicitly returned `continue=false`.
    pub continue_: bool,
    /// Non-empty system messages, concatenated with `\n` on read.
    pub system_messages: Vec<String>,
    /// Event-specific output, later hooks overriding earlier ones key-by-key.
    pub hook_specific_output: Option<Map<String, Value>>,
    /// Every hook's raw execution result, for logging/diagnostics.
    pub execution_results: Vec<HookExecutionResult>,
}

impl AggregatedHookResult {
    /// A neutral result: continue, no decision, no messages — what the
    /// pipeline returns for every event when disabled.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            continue_: true,
            ..Self::default()
        }
    }

    /// The concatenation of all system messages, if any were recorded.
    #[must_use]
    pub fn system_message(&self) -> Option<String> {
        if self.system_messages.is_empty() {
            None
        } else {
            Some(self.system_messages.join("\n"))
        }
    }

    /// Fold `other` into `self`: max-priority decision, AND of `continue_`,
    /// appended messages, later-overrides-earlier output keys.
    pub fn merge(&mut self, other: Self) {
        if decision_priority(other.decision.as_deref()) > decision_priority(self.decision.as_deref())
        {
            self.decision = other.decision;
        }
        if !other.continue_ {
            self.continue_ = false;
        }
        if let Some(message) = other.system_message() {
            self.system_messages.push(message);
        }
        if let Some(output) = other.hook_specific_output {
            self.hook_specific_output.get_or_insert_with(Map::new).extend(output);
        }
        self.execution_results.extend(other.execution_results);
    }
}

/// Aggregate raw execution results for one group into one folded result.
#[must_use]
pub fn aggregate_results(results: Vec<HookExecutionResult>) -> AggregatedHookResult {
    let mut aggregated = AggregatedHookResult {
        continue_: true,
        ..AggregatedHookResult::default()
    };

    let blocking: Vec<&HookExecutionResult> =
        results.iter().filter(|r| r.is_blocking()).collect();
    if let Some(first) = blocking.first() {
        aggregated.continue_ = false;
        if !first.stderr.is_empty() {
            aggregated.system_messages.push(first.stderr.clone());
        }
    }

    for result in results.iter().filter(|r| r.success()) {
        if result.stdout.trim().is_empty() {
            continue;
        }
        let output = HookOutput::from_stdout(&result.stdout);
        aggregated.merge(AggregatedHookResult {
            decision: output.decision,
            continue_: output.continue_,
            system_messages: output.system_message.into_iter().collect(),
            hook_specific_output: output.hook_specific_output,
            execution_results: Vec::new(),
        });
    }

    aggregated.execution_results = results;
    aggregated
}

/// Environment/context the runner stamps onto every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// The current session id, if any.
    pub session_id: Option<String>,
    /// The workspace root directory.
    pub workspace_dir: PathBuf,
    /// The CLI/crate version, exposed as `EFLYCODE_CLI_VERSION`.
    pub cli_version: String,
}

/// Executes hook commands as subprocesses.
#[derive(Debug, Clone)]
pub struct HookRunner {
    context: HookContext,
}

impl HookRunner {
    /// Build a runner stamping `context` onto every invocation.
    #[must_use]
    pub fn new(context: HookContext) -> Self {
        Self { context }
    }

    fn expand_env_vars(&self, command: &str) -> String {
        let session_id = self.context.session_id.clone().unwrap_or_default();
        let workspace_dir = self.context.workspace_dir.display().to_string();
        command
            .replace("${EFLYCODE_PROJECT_DIR}", &workspace_dir)
            .replace("${EFLYCODE_WORKSPACE_DIR}", &workspace_dir)
            .replace("${EFLYCODE_CLI_VERSION}", &self.context.cli_version)
            .replace("${EFLYCODE_SESSION_ID}", &session_id)
    }

    fn build_input_data(&self, event: HookEvent, event_data: Map<String, Value>) -> Value {
        let mut input = Map::new();
        input.insert(
            "session_id".to_string(),
            Value::String(self.context.session_id.clone().unwrap_or_default()),
        );
        input.insert(
            "hook_event_name".to_string(),
            Value::String(event.as_str().to_string()),
        );
        input.insert(
            "workspace_dir".to_string(),
            Value::String(self.context.workspace_dir.display().to_string()),
        );
        input.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        for (key, value) in event_data {
            input.insert(key, value);
        }
        Value::Object(input)
    }

    /// Run one hook, returning its raw execution result. Never returns an
    /// `Err` — a subprocess spawn failure or timeout is itself recorded as a
    /// non-zero-exit-code [`HookExecutionResult`].
    pub async fn execute(
        &self,
        hook: &CommandHook,
        event: HookEvent,
        event_data: Map<String, Value>,
    ) -> HookExecutionResult {
        let start = std::time::Instant::now();
        let input = self.build_input_data(event, event_data);
        let stdin_payload = serde_json::to_string(&input).unwrap_or_default();
        let command = self.expand_env_vars(&hook.command);

        let run = async {
            let mut child = Self::spawn_shell(&command, &self.context.workspace_dir, &self.context)
                .map_err(|e| e.to_string())?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(stdin_payload.as_bytes())
                    .await
                    .map_err(|e| e.to_string())?;
            }
            child.wait_with_output().await.map_err(|e| e.to_string())
        };

        match tokio::time::timeout(Duration::from_millis(hook.timeout_ms), run).await {
            Ok(Ok(output)) => HookExecutionResult {
                hook_name: hook.name.clone(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                duration: start.elapsed(),
            },
            Ok(Err(message)) => HookExecutionResult {
                hook_name: hook.name.clone(),
                stdout: String::new(),
                stderr: format!("hook execution error: {message}"),
                exit_code: 1,
                duration: start.elapsed(),
            },
            Err(_elapsed) => HookExecutionResult {
                hook_name: hook.name.clone(),
                stdout: String::new(),
                stderr: format!("hook execution timeout after {}ms", hook.timeout_ms),
                exit_code: 124,
                duration: start.elapsed(),
            },
        }
    }

    fn spawn_shell(
        command: &str,
        workspace_dir: &Path,
        context: &HookContext,
    ) -> std::io::Result<tokio::process::Child> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.current_dir(workspace_dir)
            .env(
                "EFLYCODE_PROJECT_DIR",
                workspace_dir.display().to_string(),
            )
            .env(
                "EFLYCODE_WORKSPACE_DIR",
                workspace_dir.display().to_string(),
            )
            .env("EFLYCODE_CLI_VERSION", &context.cli_version)
            .env(
                "EFLYCODE_SESSION_ID",
                context.session_id.clone().unwrap_or_default(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn()
    }

    /// Run `hooks` in parallel, returning their raw results in completion
    /// order.
    pub async fn execute_parallel(
        &self,
        hooks: &[CommandHook],
        event: HookEvent,
        event_data: &Map<String, Value>,
    ) -> Vec<HookExecutionResult> {
        let futures = hooks
            .iter()
            .map(|hook| self.execute(hook, event, event_data.clone()));
        futures::future::join_all(futures).await
    }

    /// Run `hooks` sequentially, merging each hook's `hook_specific_output`
    /// into the next hook's input and stopping early on a blocking result.
    pub async fn execute_sequential(
        &self,
        hooks: &[CommandHook],
        event: HookEvent,
        initial_event_data: &Map<String, Value>,
    ) -> Vec<HookExecutionResult> {
        let mut results = Vec::with_capacity(hooks.len());
        let mut current_data = initial_event_data.clone();

        for hook in hooks {
            let result = self.execute(hook, event, current_data.clone()).await;
            if result.success() && !result.stdout.is_empty() {
                let output = HookOutput::from_stdout(&result.stdout);
                if let Some(extra) = output.hook_specific_output {
                    current_data.extend(extra);
                }
            }
            let blocking = result.is_blocking();
            results.push(result);
            if blocking {
                break;
            }
        }

        results
    }
}

/// Orchestrates the registry and runner: selects matching groups for an
/// event (and, for tool events, a tool name), runs them, and aggregates.
#[derive(Debug, Clone)]
pub struct HookPipeline {
    registry: HookRegistry,
    runner: HookRunner,
    enabled: bool,
}

impl HookPipeline {
    /// Build a pipeline over `registry`, executing through `runner`.
    #[must_use]
    pub fn new(registry: HookRegistry, runner: HookRunner) -> Self {
        Self {
            registry,
            runner,
            enabled: true,
        }
    }

    /// Disable the pipeline: every `fire` call below returns
    /// [`AggregatedHookResult::neutral`] without invoking any hook.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Fire `event`, running every group (and hook) whose matcher accepts
    /// `tool_name` (pass `None` for non-tool events, which accept everything).
    pub async fn fire(
        &self,
        event: HookEvent,
        tool_name: Option<&str>,
        event_data: Map<String, Value>,
    ) -> AggregatedHookResult {
        if !self.enabled {
            return AggregatedHookResult::neutral();
        }

        let mut aggregated = AggregatedHookResult {
            continue_: true,
            ..AggregatedHookResult::default()
        };

        for group in self.registry.groups_for(event) {
            if let Some(tool_name) = tool_name {
                if !group.matches_tool(tool_name) {
                    continue;
                }
            }
            let hooks: Vec<CommandHook> = group
                .hooks
                .iter()
                .filter(|hook| tool_name.is_none_or(|name| hook.matches_tool(name)))
                .cloned()
                .collect();
            if hooks.is_empty() {
                continue;
            }

            let results = if group.sequential {
                self.runner
                    .execute_sequential(&hooks, event, &event_data)
                    .await
            } else {
                self.runner.execute_parallel(&hooks, event, &event_data).await
            };

            aggregated.merge(aggregate_results(results));
        }

        aggregated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_output_parses_valid_json() {
        let output = HookOutput::from_stdout(r#"{"decision":"block","continue":false,"systemMessage":"denied"}"#);
        assert_eq!(output.decision.as_deref(), Some("block"));
        assert!(!output.continue_);
        assert_eq!(output.system_message.as_deref(), Some("denied"));
    }

    #[test]
    fn hook_output_treats_invalid_json_as_system_message() {
        let output = HookOutput::from_stdout("not json");
        assert!(output.decision.is_none());
        assert!(output.continue_);
        assert_eq!(output.system_message.as_deref(), Some("not json"));
    }

    #[test]
    fn aggregation_is_monotonic_under_the_fold() {
        let r1 = AggregatedHookResult {
            decision: Some("ask".to_string()),
            continue_: true,
            system_messages: vec!["m1".to_string()],
            hook_specific_output: None,
            execution_results: Vec::new(),
        };
        let r2 = AggregatedHookResult {
            decision: Some("block".to_string()),
            continue_: false,
            system_messages: vec!["m2".to_string()],
            hook_specific_output: None,
            execution_results: Vec::new(),
        };

        let mut left = AggregatedHookResult::neutral();
        left.merge(r1.clone());
        left.merge(r2.clone());

        let mut right = AggregatedHookResult::neutral();
        right.merge(r1);
        right.merge(r2);

        assert_eq!(left.decision, right.decision);
        assert_eq!(left.continue_, right.continue_);
        assert_eq!(left.system_messages, right.system_messages);
    }

    #[test]
    fn block_outranks_deny() {
        let mut aggregated = AggregatedHookResult::neutral();
        aggregated.merge(AggregatedHookResult {
            decision: Some("deny".to_string()),
            continue_: true,
            ..AggregatedHookResult::default()
        });
        aggregated.merge(AggregatedHookResult {
            decision: Some("block".to_string()),
            continue_: true,
            ..AggregatedHookResult::default()
        });
        assert_eq!(aggregated.decision.as_deref(), Some("block"));
    }

    #[test]
    fn matcher_star_and_none_match_everything() {
        assert!(matches_tool(None, "read_file"));
        assert!(matches_tool(Some("*"), "read_file"));
        assert!(matches_tool(Some("read_.*"), "read_file"));
        assert!(!matches_tool(Some("write_.*"), "read_file"));
    }

    #[tokio::test]
    async fn disabled_pipeline_returns_neutral_without_running_hooks() {
        let mut registry = HookRegistry::new();
        registry.register(
            HookEvent::BeforeTool,
            HookGroup {
                matcher: None,
                sequential: false,
                hooks: vec![CommandHook {
                    name: "always-fails".to_string(),
                    command: "exit 2".to_string(),
                    timeout_ms: 1000,
                    matcher: None,
                }],
            },
        );
        let runner = HookRunner::new(HookContext {
            session_id: None,
            workspace_dir: PathBuf::from("."),
            cli_version: "test".to_string(),
        });
        let mut pipeline = HookPipeline::new(registry, runner);
        pipeline.set_enabled(false);
        let result = pipeline
            .fire(HookEvent::BeforeTool, Some("read_file"), Map::new())
            .await;
        assert!(result.continue_);
        assert!(result.decision.is_none());
        assert!(result.execution_results.is_empty());
    }

    #[tokio::test]
    async fn blocking_hook_sets_continue_false_and_surfaces_stderr() {
        let mut registry = HookRegistry::new();
        registry.register(
            HookEvent::BeforeTool,
            HookGroup {
                matcher: None,
                sequential: false,
                hooks: vec![CommandHook {
                    name: "blocker".to_string(),
                    command: "echo denied 1>&2; exit 2".to_string(),
                    timeout_ms: 5000,
                    matcher: None,
                }],
            },
        );
        let runner = HookRunner::new(HookContext {
            session_id: Some("sess_1".to_string()),
            workspace_dir: std::env::temp_dir(),
            cli_version: "test".to_string(),
        });
        let pipeline = HookPipeline::new(registry, runner);
        let result = pipeline
            .fire(HookEvent::BeforeTool, Some("delete_path"), Map::new())
            .await;
        assert!(!result.continue_);
        assert!(result.system_message().unwrap_or_default().contains("denied"));
    }
}
