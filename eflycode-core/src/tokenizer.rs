//! Token counting for context-window budgeting.
//!
//! No byte-pair-encoding crate appears anywhere in the dependency graph this
//! crate draws from, so this counts whitespace/punctuation-delimited words
//! per string as an *estimate* rather than a bit-exact reproduction of any
//! provider's real tokenizer — sufficient for the threshold comparisons the
//! [`crate::context`] strategies need. Caches a resolved encoding name per
//! model the way a real `tiktoken`-backed tokenizer would cache its encoder,
//! and charges a flat per-message framing constant on top of word counts.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;

use crate::message::Message;

/// Per-message framing overhead, in tokens. Hard-coded in the source this
/// crate is grounded on; the provider's true framing cost may differ.
const FRAMING_TOKENS_PER_MESSAGE: usize = 4;

const DEFAULT_ENCODING: &str = "cl100k_base";

/// Counts tokens for messages, caching a word-splitting "encoding" per
/// resolved encoding name the way the source caches real `tiktoken`
/// encoders.
pub struct Tokenizer {
    word_splitter: Regex,
    encodings: Mutex<HashMap<String, ()>>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    /// Build a tokenizer. The word-splitting regex is compiled once.
    #[must_use]
    pub fn new() -> Self {
        Self {
            word_splitter: Regex::new(r"[A-Za-z0-9_]+|[^\sA-Za-z0-9_]").expect("static regex"),
            encodings: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve (and cache) the encoding name used for `model`. Every model
    /// maps to the same default encoding today; the cache exists so a future
    /// per-model mapping doesn't change this method's signature.
    fn encoding_for_model(&self, _model: &str) -> String {
        let encoding_name = DEFAULT_ENCODING.to_string();
        let mut cache = self.encodings.lock().unwrap_or_else(|e| e.into_inner());
        cache.entry(encoding_name.clone()).or_insert(());
        encoding_name
    }

    fn count_str(&self, text: &str) -> usize {
        self.word_splitter.find_iter(text).count()
    }

    /// Token count for a single message, including its role, content, tool
    /// calls, and `tool_call_id`, plus the per-message framing constant.
    #[must_use]
    pub fn count_message_tokens(&self, message: &Message, model: &str) -> usize {
        let _encoding = self.encoding_for_model(model);
        let mut tokens = self.count_str(message.role.as_str());

        if let Some(content) = &message.content {
            tokens += self.count_str(content);
        }

        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                tokens += self.count_str(&call.function_name);
                tokens += self.count_str(&call.arguments_json_string);
            }
        }

        if let Some(tool_call_id) = &message.tool_call_id {
            tokens += self.count_str(tool_call_id);
        }

        tokens + FRAMING_TOKENS_PER_MESSAGE
    }

    /// Token count for an entire message list.
    #[must_use]
    pub fn count_tokens(&self, messages: &[Message], model: &str) -> usize {
        messages
            .iter()
            .map(|message| self.count_message_tokens(message, model))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_and_framing_overhead() {
        let tokenizer = Tokenizer::new();
        let message = Message::user("hello world");
        let count = tokenizer.count_message_tokens(&message, "gpt-4o");
        assert_eq!(count, 2 + FRAMING_TOKENS_PER_MESSAGE + 1);
    }

    #[test]
    fn empty_content_only_counts_role_and_framing() {
        let tokenizer = Tokenizer::new();
        let message = Message::tool_result("call_1", "");
        let count = tokenizer.count_message_tokens(&message, "gpt-4o");
        assert_eq!(count, 1 + FRAMING_TOKENS_PER_MESSAGE);
    }

    #[test]
    fn sums_across_message_list() {
        let tokenizer = Tokenizer::new();
        let messages = vec![Message::user("hi"), Message::assistant("hello there")];
        let total = tokenizer.count_tokens(&messages, "gpt-4o");
        let expected: usize = messages
            .iter()
            .map(|m| tokenizer.count_message_tokens(m, "gpt-4o"))
            .sum();
        assert_eq!(total, expected);
    }

    #[test]
    fn encoding_cache_is_reused() {
        let tokenizer = Tokenizer::new();
        let _ = tokenizer.encoding_for_model("gpt-4o");
        let _ = tokenizer.encoding_for_model("gpt-4o");
        assert_eq!(tokenizer.encodings.lock().unwrap().len(), 1);
    }
}
