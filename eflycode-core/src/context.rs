//! Context compression: keeps a conversation under a model's token window.
//!
//! Two strategies are available, `sliding_window` and `summary`, with
//! distinct boundary operators (`>` for the window, `>=` for the summary
//! threshold) and distinct marker strings prepended to preserved content
//! (`"[User's initial question] "`, `"[Conversation summary] "`).

use serde::{Deserialize, Serialize};

use crate::llm::{LLMRequest, Provider};
use crate::message::{Message, Role};
use crate::tokenizer::Tokenizer;

/// Which compression strategy a [`ContextStrategyConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Summarize the oldest messages via an LLM call once near the window.
    Summary,
    /// Keep only the most recent `N` messages.
    SlidingWindow,
}

/// Configuration for whichever strategy `strategy_type` selects. Unused
/// fields for the other strategy are simply ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStrategyConfig {
    /// Which strategy to apply.
    pub strategy_type: StrategyType,
    /// Summary strategy: fraction of `max_context_length` that triggers
    /// compression. Default `0.8`.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: f64,
    /// Summary strategy: how many trailing messages to keep verbatim.
    #[serde(default = "default_summary_keep_recent")]
    pub summary_keep_recent: usize,
    /// Summary strategy: model to summarize with, or `None` to reuse the
    /// conversation's own model.
    #[serde(default)]
    pub summary_model: Option<String>,
    /// Sliding-window strategy: how many trailing messages to keep.
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,
}

const fn default_summary_threshold() -> f64 {
    0.8
}

const fn default_summary_keep_recent() -> usize {
    10
}

const fn default_sliding_window_size() -> usize {
    10
}

impl Default for ContextStrategyConfig {
    fn default() -> Self {
        Self {
            strategy_type: StrategyType::SlidingWindow,
            summary_threshold: default_summary_threshold(),
            summary_keep_recent: default_summary_keep_recent(),
            summary_model: None,
            sliding_window_size: default_sliding_window_size(),
        }
    }
}

/// Pure message-list compressor. Holds no conversation state of its own.
#[derive(Debug, Default)]
pub struct ContextManager {
    tokenizer: Tokenizer,
}

impl ContextManager {
    /// Build a manager with a fresh [`Tokenizer`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a (possibly compressed) message list fitting `model`'s window.
    ///
    /// No-op when `messages` is empty or `config` is `None`. Never mutates
    /// `messages`.
    pub async fn manage(
        &self,
        messages: &[Message],
        model: &str,
        config: Option<&ContextStrategyConfig>,
        max_context_length: usize,
        initial_user_question: Option<&str>,
        provider: Option<&(dyn Provider + Sync)>,
    ) -> Vec<Message> {
        let Some(config) = config else {
            return messages.to_vec();
        };
        if messages.is_empty() {
            return messages.to_vec();
        }

        match config.strategy_type {
            StrategyType::SlidingWindow => {
                if !self.sliding_window_should_compress(messages, config) {
                    return messages.to_vec();
                }
                self.sliding_window_compress(messages, config, initial_user_question)
            }
            StrategyType::Summary => {
                if !self.summary_should_compress(messages, model, config, max_context_length) {
                    return messages.to_vec();
                }
                self.summary_compress(messages, model, config, provider).await
            }
        }
    }

    fn sliding_window_should_compress(
        &self,
        messages: &[Message],
        config: &ContextStrategyConfig,
    ) -> bool {
        messages.len() > config.sliding_window_size
    }

    fn sliding_window_compress(
        &self,
        messages: &[Message],
        config: &ContextStrategyConfig,
        initial_user_question: Option<&str>,
    ) -> Vec<Message> {
        let window = config.sliding_window_size;
        if messages.len() <= window {
            return messages.to_vec();
        }
        let recent: Vec<Message> = messages[messages.len() - window..].to_vec();

        let has_initial_question = initial_user_question.is_some_and(|question| {
            recent
                .iter()
                .any(|m| m.role == Role::User && m.content.as_deref() == Some(question))
        });

        if let Some(question) = initial_user_question {
            if !has_initial_question {
                let mut compressed = vec![Message::system(format!(
                    "[User's initial question] {question}"
                ))];
                compressed.extend(recent);
                return compressed;
            }
        }

        recent
    }

    fn summary_should_compress(
        &self,
        messages: &[Message],
        model: &str,
        config: &ContextStrategyConfig,
        max_context_length: usize,
    ) -> bool {
        if messages.is_empty() {
            return false;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let threshold = (max_context_length as f64 * config.summary_threshold) as usize;
        self.tokenizer.count_tokens(messages, model) >= threshold
    }

    async fn summary_compress(
        &self,
        messages: &[Message],
        model: &str,
        config: &ContextStrategyConfig,
        provider: Option<&(dyn Provider + Sync)>,
    ) -> Vec<Message> {
        let keep_recent = config.summary_keep_recent;
        if messages.len() <= keep_recent {
            return messages.to_vec();
        }

        let old_messages = &messages[..messages.len() - keep_recent];
        let recent_messages = &messages[messages.len() - keep_recent..];

        let Some(provider) = provider else {
            return messages.to_vec();
        };

        let summary_model = config.summary_model.clone().unwrap_or_else(|| model.to_string());
        let summary_prompt = build_summary_prompt(old_messages);
        let request = LLMRequest::new(summary_model, vec![Message::user(summary_prompt)]);

        match provider.call(request).await {
            Ok(response) => {
                let summary = response.message.content.unwrap_or_default();
                let mut compressed =
                    vec![Message::system(format!("[Conversation summary] {summary}"))];
                compressed.extend(recent_messages.iter().cloned());
                compressed
            }
            Err(error) => {
                tracing::warn!(%error, "context summary call failed, falling back to original messages");
                messages.to_vec()
            }
        }
    }
}

fn build_summary_prompt(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        let role_name = message.role.as_str();
        let mut line = format!("{role_name}: {}", message.content.as_deref().unwrap_or(""));
        if let Some(tool_calls) = &message.tool_calls {
            if !tool_calls.is_empty() {
                let names = tool_calls
                    .iter()
                    .map(|tc| tc.function_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                line.push_str(&format!(" [called tools: {names}]"));
            }
        }
        lines.push(line);
    }
    format!(
        "Summarize the following conversation history, preserving key information and context for future turns:\n\n{}\n\nSummarize concisely, covering: the user's main questions and goals, important discussion points and decisions, and context worth retaining.",
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChunkStream, LLMResponse, ProviderCapabilities};
    use async_trait::async_trait;

    fn messages(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("msg {i}"))).collect()
    }

    #[tokio::test]
    async fn no_config_is_a_no_op() {
        let manager = ContextManager::new();
        let msgs = messages(20);
        let result = manager.manage(&msgs, "gpt-4o", None, 1000, None, None).await;
        assert_eq!(result, msgs);
    }

    #[tokio::test]
    async fn sliding_window_keeps_last_n_and_no_compress_when_equal() {
        let manager = ContextManager::new();
        let config = ContextStrategyConfig {
            strategy_type: StrategyType::SlidingWindow,
            sliding_window_size: 3,
            ..Default::default()
        };
        let msgs = messages(3);
        let result = manager
            .manage(&msgs, "gpt-4o", Some(&config), 1000, None, None)
            .await;
        assert_eq!(result, msgs);

        let msgs = messages(5);
        let result = manager
            .manage(&msgs, "gpt-4o", Some(&config), 1000, None, None)
            .await;
        assert_eq!(result.len(), 3);
        assert_eq!(result, msgs[2..].to_vec());
    }

    #[tokio::test]
    async fn sliding_window_prepends_initial_question_marker_when_dropped() {
        let manager = ContextManager::new();
        let config = ContextStrategyConfig {
            strategy_type: StrategyType::SlidingWindow,
            sliding_window_size: 2,
            ..Default::default()
        };
        let msgs = messages(5);
        let result = manager
            .manage(&msgs, "gpt-4o", Some(&config), 1000, Some("msg 0"), None)
            .await;
        assert_eq!(result.len(), 3);
        assert_eq!(
            result[0].content.as_deref(),
            Some("[User's initial question] msg 0")
        );
    }

    #[tokio::test]
    async fn sliding_window_skips_marker_when_question_still_in_window() {
        let manager = ContextManager::new();
        let config = ContextStrategyConfig {
            strategy_type: StrategyType::SlidingWindow,
            sliding_window_size: 5,
            ..Default::default()
        };
        let msgs = messages(6);
        let result = manager
            .manage(&msgs, "gpt-4o", Some(&config), 1000, Some("msg 1"), None)
            .await;
        assert_eq!(result.len(), 5);
        assert!(result
            .iter()
            .any(|m| m.content.as_deref() == Some("msg 1")));
    }

    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
        async fn call(&self, _request: LLMRequest) -> crate::error::Result<LLMResponse> {
            Ok(LLMResponse {
                id: "resp_1".to_string(),
                model: "gpt-4o".to_string(),
                created: 0,
                message: Message::assistant("summary text"),
                finish_reason: Some("stop".to_string()),
                usage: None,
            })
        }

        async fn stream(&self, _request: LLMRequest) -> crate::error::Result<ChunkStream> {
            unimplemented!("not used in this test")
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }
    }

    #[tokio::test]
    async fn summary_compresses_at_threshold_and_keeps_recent() {
        let manager = ContextManager::new();
        let config = ContextStrategyConfig {
            strategy_type: StrategyType::Summary,
            summary_threshold: 0.0,
            summary_keep_recent: 2,
            ..Default::default()
        };
        let msgs = messages(10);
        let provider = StubProvider;
        let result = manager
            .manage(&msgs, "gpt-4o", Some(&config), 1000, None, Some(&provider))
            .await;
        assert_eq!(result.len(), 3);
        assert_eq!(
            result[0].content.as_deref(),
            Some("[Conversation summary] summary text")
        );
        assert_eq!(result[1..], msgs[8..]);
    }

    #[tokio::test]
    async fn summary_without_provider_returns_original() {
        let manager = ContextManager::new();
        let config = ContextStrategyConfig {
            strategy_type: StrategyType::Summary,
            summary_threshold: 0.0,
            summary_keep_recent: 2,
            ..Default::default()
        };
        let msgs = messages(10);
        let result = manager
            .manage(&msgs, "gpt-4o", Some(&config), 1000, None, None)
            .await;
        assert_eq!(result, msgs);
    }
}
