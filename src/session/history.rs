//! # Chat History Store
//!
//! An ordered, token-budgeted log of conversational turns, owned exclusively
//! by one session. Exactly one system message (the persona/instructions)
//! leads the history and is never evicted; everything else is evicted oldest
//! first whenever the approximate token total exceeds the budget.
//!
//! Token counting is an approximation used as a budget control, not a
//! precise tokenizer. The estimator is pluggable; the default assumes
//! roughly four characters per token.

use crate::completion::{ChatMessage, Role};

/// Length-estimation function mapping text to an approximate token count.
pub type TokenEstimator = fn(&str) -> usize;

/// Default heuristic: ~4 characters per token.
pub fn default_estimator(text: &str) -> usize {
    text.len() / 4
}

/// One stored message with its cached token estimate.
#[derive(Debug, Clone)]
struct StoredMessage {
    message: ChatMessage,
    approx_tokens: usize,
}

/// Ordered, budgeted conversation log.
#[derive(Debug)]
pub struct ChatHistory {
    messages: Vec<StoredMessage>,
    max_tokens: usize,
    estimator: TokenEstimator,
}

impl ChatHistory {
    /// Create a history with the given persona message and token budget.
    pub fn new(system_prompt: &str, max_tokens: usize) -> Self {
        Self::with_estimator(system_prompt, max_tokens, default_estimator)
    }

    /// Create a history with a custom token estimator.
    pub fn with_estimator(
        system_prompt: &str,
        max_tokens: usize,
        estimator: TokenEstimator,
    ) -> Self {
        let system = ChatMessage::system(system_prompt);
        let approx_tokens = estimator(&system.content);
        Self {
            messages: vec![StoredMessage {
                message: system,
                approx_tokens,
            }],
            max_tokens,
            estimator,
        }
    }

    /// Append the user's finalized transcript, then trim.
    pub fn append_user(&mut self, text: &str) {
        self.append(ChatMessage::user(text));
    }

    /// Append the assistant's completed utterance, then trim.
    pub fn append_assistant(&mut self, text: &str) {
        self.append(ChatMessage::assistant(text));
    }

    fn append(&mut self, message: ChatMessage) {
        let approx_tokens = (self.estimator)(&message.content);
        self.messages.push(StoredMessage {
            message,
            approx_tokens,
        });
        self.trim();
    }

    /// Evict oldest non-system messages until the budget invariant holds.
    fn trim(&mut self) {
        // Index 1 is the oldest evictable message; index 0 is the persona.
        while self.total_tokens() > self.max_tokens && self.messages.len() > 1 {
            self.messages.remove(1);
        }
    }

    /// Immutable copy of the history for the turn-completion call.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    /// Approximate token total across all retained messages.
    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.approx_tokens).sum()
    }

    /// Number of retained messages, system message included.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_leads_history() {
        let mut history = ChatHistory::new("persona", 800);
        history.append_user("hello");
        history.append_assistant("hi there");

        let snapshot = history.snapshot();
        assert_eq!(snapshot[0].role, Role::System);
        assert_eq!(snapshot[0].content, "persona");
        assert_eq!(snapshot[1].role, Role::User);
        assert_eq!(snapshot[2].role, Role::Assistant);
    }

    #[test]
    fn test_trim_never_exceeds_budget() {
        // Estimator counting one token per character keeps the math obvious.
        let mut history = ChatHistory::with_estimator("sys", 20, |t| t.len());
        for _ in 0..10 {
            history.append_user("0123456789"); // 10 tokens each
        }
        assert!(history.total_tokens() <= 20);
        assert_eq!(history.snapshot()[0].content, "sys");
    }

    #[test]
    fn test_trim_evicts_oldest_non_system_first() {
        let mut history = ChatHistory::with_estimator("s", 25, |t| t.len());
        history.append_user("first-turn");
        history.append_assistant("second-msg");
        history.append_user("third-turn"); // pushes past 25, "first-turn" must go

        let snapshot = history.snapshot();
        assert_eq!(snapshot[0].content, "s");
        assert_eq!(snapshot[1].content, "second-msg");
        assert_eq!(snapshot[2].content, "third-turn");
    }

    #[test]
    fn test_system_message_survives_even_tiny_budgets() {
        let mut history = ChatHistory::with_estimator("a long persona prompt", 2, |t| t.len());
        history.append_user("whatever");
        let snapshot = history.snapshot();
        assert_eq!(snapshot[0].role, Role::System);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_default_estimator_is_quarter_length() {
        assert_eq!(default_estimator("12345678"), 2);
        assert_eq!(default_estimator(""), 0);
    }

    #[test]
    fn test_snapshot_is_decoupled_from_later_mutation() {
        let mut history = ChatHistory::new("sys", 800);
        history.append_user("hello");
        let snapshot = history.snapshot();
        history.append_assistant("hi");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(history.len(), 3);
    }
}
