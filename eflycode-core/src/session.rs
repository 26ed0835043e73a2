//! The session: an append-only message log for one conversation.
//!
//! An ordered message list plus an `initial_user_question` memo that, once
//! set, survives any number of [`ContextManager`] compression passes (see
//! `crate::context`).

use crate::context::{ContextManager, ContextStrategyConfig};
use crate::llm::{LLMRequest, Provider};
use crate::message::{Message, Role};

/// Ordered message log for one conversation, plus the memo of the first
/// user question asked in it.
#[derive(Debug)]
pub struct Session {
    messages: Vec<Message>,
    initial_user_question: Option<String>,
    strategy_config: Option<ContextStrategyConfig>,
    context_manager: ContextManager,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// An empty session with no configured compression strategy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            initial_user_question: None,
            strategy_config: None,
            context_manager: ContextManager::new(),
        }
    }

    /// Configure the compression strategy `get_context` applies.
    #[must_use]
    pub fn with_strategy(mut self, config: ContextStrategyConfig) -> Self {
        self.strategy_config = Some(config);
        self
    }

    /// Append a message. Records `content` as `initial_user_question` the
    /// first time a non-empty `user` message is added; never overwrites it.
    pub fn add_message(&mut self, message: Message) {
        if self.initial_user_question.is_none()
            && message.role == Role::User
            && message.content.as_deref().is_some_and(|c| !c.is_empty())
        {
            self.initial_user_question = message.content.clone();
        }
        self.messages.push(message);
    }

    /// The message log, in append order.
    #[must_use]
    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    /// The first user question recorded in this session, if any.
    #[must_use]
    pub fn initial_user_question(&self) -> Option<&str> {
        self.initial_user_question.as_deref()
    }

    /// Reset the log and the initial-question memo.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.initial_user_question = None;
    }

    /// Build an outbound [`LLMRequest`], running the configured compression
    /// strategy over the log if one is set; otherwise the raw log is used.
    pub async fn get_context(
        &self,
        model: &str,
        max_context_length: usize,
        provider: Option<&(dyn Provider + Sync)>,
    ) -> LLMRequest {
        let messages = self
            .context_manager
            .manage(
                &self.messages,
                model,
                self.strategy_config.as_ref(),
                max_context_length,
                self.initial_user_question.as_deref(),
                provider,
            )
            .await;
        LLMRequest::new(model, messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_user_message_becomes_initial_question() {
        let mut session = Session::new();
        session.add_message(Message::system("be helpful"));
        session.add_message(Message::user("what time is it?"));
        session.add_message(Message::user("and the weather?"));
        assert_eq!(session.initial_user_question(), Some("what time is it?"));
    }

    #[test]
    fn clear_resets_log_and_memo() {
        let mut session = Session::new();
        session.add_message(Message::user("hi"));
        session.clear();
        assert!(session.get_messages().is_empty());
        assert_eq!(session.initial_user_question(), None);
    }

    #[tokio::test]
    async fn get_context_without_strategy_returns_raw_log() {
        let mut session = Session::new();
        session.add_message(Message::user("hi"));
        let request = session.get_context("gpt-4o", 1000, None).await;
        assert_eq!(request.messages.len(), 1);
    }
}
