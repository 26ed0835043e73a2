//! An in-memory [`Provider`] for tests, cycling through predefined responses.
//!
//! Cycles through a fixed list of canned replies, useful for exercising the
//! run loop and advisor chain without a real HTTP call.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;

use crate::error::Result;
use crate::llm::{ChunkStream, LLMRequest, LLMResponse, Provider, ProviderCapabilities, ResponseChunk, ResponseDelta};
use crate::message::{Message, Role};

/// Returns predefined responses in sequence, cycling through them once
/// exhausted. Useful for exercising the run loop without a real HTTP call.
#[derive(Debug)]
pub struct MockProvider {
    responses: Vec<String>,
    call_count: AtomicUsize,
}

impl MockProvider {
    /// A mock provider that cycles through `responses`.
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
        }
    }

    fn next_response(&self) -> String {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(index % self.responses.len().max(1))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn call(&self, request: LLMRequest) -> Result<LLMResponse> {
        let content = self.next_response();
        Ok(LLMResponse {
            id: "mock".to_string(),
            model: request.model,
            created: 0,
            message: Message {
                role: Role::Assistant,
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            },
            finish_reason: Some("stop".to_string()),
            usage: None,
        })
    }

    async fn stream(&self, request: LLMRequest) -> Result<ChunkStream> {
        let content = self.next_response();
        let chunks = vec![
            Ok(ResponseChunk {
                id: "mock".to_string(),
                model: request.model.clone(),
                created: 0,
                delta: ResponseDelta {
                    role: Some(Role::Assistant),
                    content: Some(content),
                    tool_calls: None,
                },
                finish_reason: None,
                usage: None,
            }),
            Ok(ResponseChunk {
                id: "mock".to_string(),
                model: request.model,
                created: 0,
                delta: ResponseDelta::default(),
                finish_reason: Some("stop".to_string()),
                usage: None,
            }),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycles_through_responses() {
        let provider = MockProvider::new(vec!["first".to_string(), "second".to_string()]);
        let request = LLMRequest::new("mock-model", vec![]);

        let r1 = provider.call(request.clone()).await.expect("call succeeds");
        assert_eq!(r1.message.content.as_deref(), Some("first"));

        let r2 = provider.call(request.clone()).await.expect("call succeeds");
        assert_eq!(r2.message.content.as_deref(), Some("second"));

        let r3 = provider.call(request).await.expect("call succeeds");
        assert_eq!(r3.message.content.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn stream_yields_content_then_finish() {
        use futures::StreamExt;

        let provider = MockProvider::new(vec!["hi".to_string()]);
        let mut chunk_stream = provider.stream(LLMRequest::new("mock-model", vec![])).await.expect("stream starts");

        let first = chunk_stream.next().await.expect("first chunk").expect("ok");
        assert_eq!(first.delta.content.as_deref(), Some("hi"));
        assert!(first.finish_reason.is_none());

        let second = chunk_stream.next().await.expect("second chunk").expect("ok");
        assert_eq!(second.finish_reason.as_deref(), Some("stop"));
    }
}
