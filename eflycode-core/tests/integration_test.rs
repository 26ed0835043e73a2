//! End-to-end exercise of the public API: build an agent around a file-system
//! workspace, run a task that reads a file through the real tool catalog,
//! and confirm both the final result and the events published along the way.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use eflycode_core::error::Result;
use eflycode_core::hooks::{CommandHook, HookGroup, HookRunner};
use eflycode_core::llm::{ChunkStream, LLMRequest, LLMResponse, Provider, ProviderCapabilities, ResponseChunk, ResponseDelta};
use eflycode_core::message::{Message, ToolCall};
use eflycode_core::providers::MockProvider;
use eflycode_core::tool::ToolRegistry;
use eflycode_core::tools::register_builtin_tools;
use eflycode_core::{Agent, CancelToken, EventBus, HookContext, HookEvent, HookPipeline, HookRegistry, SubscribeOptions};

/// Calls `read_file` once, then finishes the task with the file's contents.
struct ReadThenFinishProvider {
    path: String,
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for ReadThenFinishProvider {
    async fn call(&self, _request: LLMRequest) -> Result<LLMResponse> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let message = if call_index == 0 {
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::new(
                    "call_1",
                    "read_file",
                    json!({"path": self.path}).to_string(),
                )],
            )
        } else {
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::new(
                    "call_2",
                    "finish_task",
                    json!({"content": "done reading"}).to_string(),
                )],
            )
        };
        Ok(LLMResponse {
            id: format!("r{call_index}"),
            model: "gpt-4o".to_string(),
            created: 0,
            message,
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
        })
    }

    async fn stream(&self, _request: LLMRequest) -> Result<ChunkStream> {
        unimplemented!("not exercised by this scenario")
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }
}

#[tokio::test]
async fn agent_reads_a_file_through_the_builtin_catalog_and_finishes() {
    let workspace = tempfile::tempdir().expect("tempdir");
    std::fs::write(workspace.path().join("notes.txt"), "hello from disk").expect("write fixture");

    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, workspace.path());

    let provider: Arc<dyn Provider> = Arc::new(ReadThenFinishProvider {
        path: "notes.txt".to_string(),
        calls: AtomicUsize::new(0),
    });

    let event_bus = EventBus::new();
    let tool_results = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let tool_results_clone = Arc::clone(&tool_results);
    event_bus
        .subscribe(
            "agent.tool.result",
            Arc::new(move |data| {
                let tool_results = Arc::clone(&tool_results_clone);
                tokio::spawn(async move {
                    tool_results.lock().await.push(data);
                });
            }),
            SubscribeOptions::default(),
        )
        .await;

    let agent = Agent::builder("gpt-4o", provider)
        .tools(tools)
        .event_bus(event_bus)
        .build();
    let cancel = CancelToken::new();

    let conversation = agent
        .run(Some("what's in notes.txt?".to_string()), false, &cancel)
        .await
        .expect("run never returns Err");

    assert_eq!(conversation.result, "done reading");
    assert_eq!(conversation.statistics.iterations, 2);
    assert_eq!(conversation.statistics.tool_calls_count, 1);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let results = tool_results.lock().await;
    assert_eq!(results.len(), 1);
    assert!(results[0]["result"]
        .as_str()
        .unwrap_or_default()
        .contains("hello from disk"));
}

#[tokio::test]
async fn unknown_tool_call_is_fed_back_to_the_model_and_the_loop_continues() {
    struct BadToolThenFinishProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for BadToolThenFinishProvider {
        async fn call(&self, _request: LLMRequest) -> Result<LLMResponse> {
            let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
            let message = if call_index == 0 {
                Message::assistant_with_tool_calls(
                    None,
                    vec![ToolCall::new("call_1", "does_not_exist", "{}")],
                )
            } else {
                Message::assistant_with_tool_calls(
                    None,
                    vec![ToolCall::new(
                        "call_2",
                        "finish_task",
                        json!({"content": "recovered"}).to_string(),
                    )],
                )
            };
            Ok(LLMResponse {
                id: format!("r{call_index}"),
                model: "gpt-4o".to_string(),
                created: 0,
                message,
                finish_reason: Some("tool_calls".to_string()),
                usage: None,
            })
        }

        async fn stream(&self, _request: LLMRequest) -> Result<ChunkStream> {
            unimplemented!("not exercised by this scenario")
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }
    }

    let workspace = tempfile::tempdir().expect("tempdir");
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, workspace.path());

    let provider: Arc<dyn Provider> = Arc::new(BadToolThenFinishProvider {
        calls: AtomicUsize::new(0),
    });
    let agent = Agent::builder("gpt-4o", provider).tools(tools).build();
    let cancel = CancelToken::new();

    let conversation = agent.run(Some("go".to_string()), false, &cancel).await.unwrap();
    assert_eq!(conversation.result, "recovered");
    assert_eq!(conversation.statistics.iterations, 2);
    assert_eq!(conversation.statistics.tool_calls_count, 0);
}

#[tokio::test]
async fn mock_provider_cycles_plain_text_responses_without_tools() {
    let provider: Arc<dyn Provider> = Arc::new(MockProvider::new(vec!["first answer".to_string()]));
    let agent = Agent::builder("mock-model", provider).build();
    let cancel = CancelToken::new();

    let conversation = agent.run(Some("hi".to_string()), false, &cancel).await.unwrap();
    assert_eq!(conversation.result, "first answer");
    assert_eq!(conversation.messages.len(), 2);
}

#[tokio::test]
async fn before_tool_hook_blocks_the_call_and_the_model_recovers() {
    struct BlockedToolThenFinishProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for BlockedToolThenFinishProvider {
        async fn call(&self, _request: LLMRequest) -> Result<LLMResponse> {
            let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
            let message = if call_index == 0 {
                Message::assistant_with_tool_calls(
                    None,
                    vec![ToolCall::new(
                        "call_1",
                        "delete_path",
                        json!({"path": "notes.txt"}).to_string(),
                    )],
                )
            } else {
                Message::assistant_with_tool_calls(
                    None,
                    vec![ToolCall::new(
                        "call_2",
                        "finish_task",
                        json!({"content": "I cannot proceed."}).to_string(),
                    )],
                )
            };
            Ok(LLMResponse {
                id: format!("r{call_index}"),
                model: "gpt-4o".to_string(),
                created: 0,
                message,
                finish_reason: Some("tool_calls".to_string()),
                usage: None,
            })
        }

        async fn stream(&self, _request: LLMRequest) -> Result<ChunkStream> {
            unimplemented!("not exercised by this scenario")
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }
    }

    let workspace = tempfile::tempdir().expect("tempdir");
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, workspace.path());

    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::BeforeTool,
        HookGroup {
            matcher: None,
            sequential: false,
            hooks: vec![CommandHook {
                name: "deny-deletes".to_string(),
                command: "echo denied 1>&2; exit 2".to_string(),
                timeout_ms: 5_000,
                matcher: None,
            }],
        },
    );
    let context = HookContext {
        session_id: None,
        workspace_dir: workspace.path().to_path_buf(),
        cli_version: "test".to_string(),
    };
    let hooks = HookPipeline::new(registry, HookRunner::new(context));

    let provider: Arc<dyn Provider> = Arc::new(BlockedToolThenFinishProvider {
        calls: AtomicUsize::new(0),
    });
    let agent = Agent::builder("gpt-4o", provider).tools(tools).hooks(hooks).build();
    let cancel = CancelToken::new();

    let conversation = agent
        .run(Some("delete notes.txt".to_string()), false, &cancel)
        .await
        .expect("run never returns Err");

    assert_eq!(conversation.result, "I cannot proceed.");
    assert_eq!(conversation.statistics.tool_calls_count, 0);
}

#[tokio::test]
async fn interrupting_a_long_stream_stops_the_loop_within_two_seconds() {
    struct SlowStreamProvider;

    #[async_trait]
    impl Provider for SlowStreamProvider {
        async fn call(&self, _request: LLMRequest) -> Result<LLMResponse> {
            unimplemented!("not exercised by this scenario")
        }

        async fn stream(&self, _request: LLMRequest) -> Result<ChunkStream> {
            let stream = async_stream::stream! {
                for i in 0..100usize {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    yield Ok(ResponseChunk {
                        id: "r1".to_string(),
                        model: "gpt-4o".to_string(),
                        created: 0,
                        delta: ResponseDelta {
                            role: None,
                            content: Some(format!("chunk{i} ")),
                            tool_calls: None,
                        },
                        finish_reason: None,
                        usage: None,
                    });
                }
            };
            Ok(Box::pin(stream))
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                supports_streaming: true,
                supports_tools: false,
            }
        }
    }

    let provider: Arc<dyn Provider> = Arc::new(SlowStreamProvider);
    let event_bus = EventBus::new();
    let agent = Arc::new(Agent::builder("gpt-4o", provider).event_bus(event_bus.clone()).build());
    let cancel = CancelToken::new();

    let agent_clone = Arc::clone(&agent);
    let cancel_clone = cancel.clone();
    let run_handle =
        tokio::spawn(async move { agent_clone.run(Some("go slowly".to_string()), true, &cancel_clone).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    agent.interrupt(&cancel).await;

    let conversation = tokio::time::timeout(std::time::Duration::from_secs(2), run_handle)
        .await
        .expect("run loop returns within 2s")
        .expect("task join")
        .expect("run never returns Err");

    assert_eq!(conversation.result, "cancelled");
    event_bus.close(true, std::time::Duration::from_secs(1)).await;
}
