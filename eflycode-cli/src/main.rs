//! `eflycode` — a thin terminal front end for [`eflycode_core`].
//!
//! Wires a TOML config loader, a model provider (`OpenAI`-compatible HTTP or
//! an in-memory mock), the built-in tool catalog, and a hook pipeline read
//! from configuration around [`eflycode_core::Agent`]. The terminal itself
//! is an external UI adapter: it subscribes to the engine's events and
//! prints them, and maps Ctrl-C to the engine's cancel token.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

mod config;

use std::error::Error;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use eflycode_core::hooks::{HookContext, HookEvent, HookPipeline, HookRegistry, HookRunner};
use eflycode_core::llm::Provider;
use eflycode_core::providers::{MockProvider, OpenAICompatibleProvider};
use eflycode_core::tools::register_builtin_tools;
use eflycode_core::{Agent, CancelToken, EventBus, SubscribeOptions, ToolRegistry};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use self::config::{Config, ModelProviderKind};

/// A boxed error is enough for a CLI binary: every fallible command prints
/// its error and exits non-zero, it never needs to match on a variant.
type CliResult<T> = Result<T, Box<dyn Error>>;

/// Wraps a one-off message so it can be `?`-propagated into [`CliResult`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct CliError(String);

/// `eflycode` — run an agent task against a local workspace.
#[derive(Parser)]
#[command(name = "eflycode")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path (overrides the layered user/project lookup)
    #[arg(short, long, env = "EFLYCODE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task to completion
    Run(RunArgs),
    /// Initialize configuration
    Init(InitArgs),
    /// Show agent and environment status
    Status,
    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the run command.
#[derive(Args)]
struct RunArgs {
    /// The task to give the agent
    task: String,

    /// Workspace root the built-in tools are confined to (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Disable streaming; wait for the full response before printing
    #[arg(long)]
    no_stream: bool,

    /// Model to use (overrides config)
    #[arg(short, long, env = "EFLYCODE_MODEL")]
    model: Option<String>,
}

/// Arguments for the init command.
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the config command.
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "eflycode_cli={level},eflycode_core={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(args, cli.config).await,
        Commands::Init(args) => cmd_init(args).await,
        Commands::Status => cmd_status(cli.config).await,
        Commands::Config(args) => cmd_config(args, cli.config).await,
    }
}

async fn load_effective_config(config_path: Option<PathBuf>) -> CliResult<Config> {
    Ok(if let Some(path) = config_path {
        config::load_config_from(path).await?.with_env()
    } else {
        config::load_config().await?
    })
}

/// Initialize configuration.
async fn cmd_init(args: InitArgs) -> CliResult<()> {
    let config_file = config::config_path();

    if config_file.exists() && !args.force {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    config::init_config().await?;
    println!("Configuration created: {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. export OPENAI_API_KEY=<key>");
    println!("  2. eflycode run \"list the files in this repo\"");

    Ok(())
}

/// Run a task: build an agent from configuration, drive it to completion,
/// and print the final result.
async fn cmd_run(args: RunArgs, config_path: Option<PathBuf>) -> CliResult<()> {
    let mut config = load_effective_config(config_path).await?;
    if let Some(model) = args.model {
        config.model.name = model;
    }

    for issue in config.validate() {
        tracing::warn!("{issue}");
    }

    let workspace_root = args.workspace.unwrap_or(std::env::current_dir()?);

    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, &workspace_root);

    let provider = create_provider(&config)?;
    let event_bus = EventBus::new();
    subscribe_cli_adapter(&event_bus).await;
    let hooks = build_hook_pipeline(&config, &workspace_root);

    let agent = Agent::builder(config.model.name.clone(), provider)
        .tools(tools)
        .event_bus(event_bus.clone())
        .hooks(hooks)
        .max_iterations(config.model.max_iterations)
        .build();

    let cancel = CancelToken::new();
    let run_future = agent.run(Some(args.task), !args.no_stream, &cancel);
    tokio::pin!(run_future);

    let conversation = tokio::select! {
        result = &mut run_future => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupting...");
            agent.interrupt(&cancel).await;
            (&mut run_future).await?
        }
    };

    println!();
    println!("{}", conversation.result);
    tracing::info!(
        iterations = conversation.statistics.iterations,
        tool_calls = conversation.statistics.tool_calls_count,
        total_tokens = conversation.statistics.total_tokens,
        "task finished"
    );

    agent.request_stop().await;
    event_bus.close(true, Duration::from_secs(2)).await;
    Ok(())
}

/// Show status.
async fn cmd_status(config_path: Option<PathBuf>) -> CliResult<()> {
    let config_file = config_path.clone().unwrap_or_else(config::config_path);

    println!("eflycode status\n");
    println!("Configuration:");
    println!("  Path:   {}", config_file.display());
    println!("  Exists: {}", if config_file.exists() { "yes" } else { "no" });

    match load_effective_config(config_path).await {
        Ok(config) => {
            println!("  Valid:  {}", if config.is_valid() { "yes" } else { "no" });
            println!();
            println!("Model:");
            println!("  Provider:       {:?}", config.model.provider);
            println!("  Name:           {}", config.model.name);
            println!("  Max iterations: {}", config.model.max_iterations);
            println!();
            println!("Hooks:");
            if config.hooks.is_empty() {
                println!("  (none registered)");
            } else {
                for (event, groups) in &config.hooks {
                    println!("  {event}: {} group(s)", groups.len());
                }
            }
        }
        Err(e) => println!("  Valid:  no ({e})"),
    }

    println!();
    println!("Environment:");
    print_env_status("OPENAI_API_KEY");
    print_env_status("EFLYCODE_CONFIG");
    print_env_status("EFLYCODE_MODEL");

    Ok(())
}

/// Configuration management.
async fn cmd_config(args: ConfigArgs, config_path: Option<PathBuf>) -> CliResult<()> {
    let config_file = config_path.clone().unwrap_or_else(config::config_path);

    match args.command {
        ConfigCommands::Path => println!("{}", config_file.display()),
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(&config_file).await?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'eflycode init' to create one.");
            }
        }
        ConfigCommands::Validate => {
            if !config_file.exists() {
                println!("error: configuration file does not exist");
                return Ok(());
            }
            match load_effective_config(config_path).await {
                Ok(config) => {
                    let issues = config.validate();
                    if issues.is_empty() {
                        println!("Configuration is valid");
                    } else {
                        for issue in issues {
                            println!("{issue}");
                        }
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
    }

    Ok(())
}

/// Build the model provider: `[model] provider = "mock"` gives an in-memory
/// cycling stub (no network, no key needed); `"openai"` (the default) gives
/// the real HTTP client, reading `model.api_key`/`model.base_url`.
fn create_provider(config: &Config) -> CliResult<Arc<dyn Provider>> {
    match config.model.provider {
        ModelProviderKind::Mock => Ok(Arc::new(MockProvider::new(vec![
            "this is a mock response; configure [model] in your eflycode config to use a real provider".to_string(),
        ]))),
        ModelProviderKind::Openai => {
            let api_key = config.model.api_key.clone().ok_or_else(|| {
                CliError("no API key configured; set OPENAI_API_KEY or model.api_key".to_string())
            })?;
            let provider = match &config.model.base_url {
                Some(base_url) => OpenAICompatibleProvider::with_base_url(api_key, base_url.clone()),
                None => OpenAICompatibleProvider::new(api_key),
            };
            Ok(Arc::new(provider))
        }
    }
}

/// Translate the config's `hooks.<event_name>` table into a populated
/// [`HookRegistry`], wrapped in a pipeline rooted at `workspace_root`.
fn build_hook_pipeline(config: &Config, workspace_root: &std::path::Path) -> HookPipeline {
    let mut registry = HookRegistry::new();
    for (event_name, groups) in &config.hooks {
        let Some(event) = hook_event_from_name(event_name) else {
            tracing::warn!(event_name, "unknown hook event name in configuration, skipping");
            continue;
        };
        for group in groups {
            registry.register(event, group.clone());
        }
    }

    let context = HookContext {
        session_id: Some(session_id()),
        workspace_dir: workspace_root.to_path_buf(),
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    HookPipeline::new(registry, HookRunner::new(context))
}

fn hook_event_from_name(name: &str) -> Option<HookEvent> {
    const EVENTS: &[HookEvent] = &[
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
        HookEvent::BeforeAgent,
        HookEvent::AfterAgent,
        HookEvent::BeforeModel,
        HookEvent::AfterModel,
        HookEvent::BeforeToolSelection,
        HookEvent::BeforeTool,
        HookEvent::AfterTool,
        HookEvent::PreCompress,
        HookEvent::Notification,
    ];
    EVENTS.iter().copied().find(|event| event.as_str() == name)
}

/// A session id unique and stable for one run; good enough for hook
/// bookkeeping without pulling `uuid` into the CLI crate's own dependencies.
fn session_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("cli-{nanos:x}")
}

/// Subscribes to the `agent.*` events the engine emits and prints a
/// terminal-friendly rendering of each.
async fn subscribe_cli_adapter(event_bus: &EventBus) {
    event_bus
        .subscribe(
            "agent.message.delta",
            Arc::new(|data| {
                if let Some(delta) = data.get("delta").and_then(serde_json::Value::as_str) {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
            }),
            SubscribeOptions::default(),
        )
        .await;

    event_bus
        .subscribe(
            "agent.tool.call",
            Arc::new(|data| {
                let tool_name = data.get("tool_name").and_then(serde_json::Value::as_str).unwrap_or("?");
                eprintln!("\n[tool] {tool_name} ...");
            }),
            SubscribeOptions::default(),
        )
        .await;

    event_bus
        .subscribe(
            "agent.tool.error",
            Arc::new(|data| {
                let tool_name = data.get("tool_name").and_then(serde_json::Value::as_str).unwrap_or("?");
                let message = data.get("message").and_then(serde_json::Value::as_str).unwrap_or("");
                eprintln!("[tool] {tool_name} failed: {message}");
            }),
            SubscribeOptions::default(),
        )
        .await;

    event_bus
        .subscribe(
            "agent.task.error",
            Arc::new(|data| {
                let message = data.get("message").and_then(serde_json::Value::as_str).unwrap_or("");
                eprintln!("\n[error] {message}");
            }),
            SubscribeOptions::default(),
        )
        .await;
}

/// Print environment variable status.
fn print_env_status(name: &str) {
    let status = if std::env::var(name).is_ok() { "set" } else { "-" };
    println!("  {name}: {status}");
}
