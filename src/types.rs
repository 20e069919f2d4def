//! Core data types used throughout promptforge.
//!
//! This module defines the generation inputs (examples and prompts), the
//! reply items that flow from a backend back to the consumer, and the
//! message format used by request/response backends.

use serde::{Deserialize, Serialize};

// --- Generation Inputs ---

/// One training/context sample fed to the model before the real prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Example {
    /// Optional description of what the example shows (may be empty)
    #[serde(default)]
    pub description: String,
    pub content: String,
}

impl Example {
    pub fn new(description: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            content: content.into(),
        }
    }
}

/// A prompt turn. `system` carries conversation context when non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    #[serde(default)]
    pub system: String,
    pub content: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            content: content.into(),
        }
    }
}

/// A chat request as submitted by the consumer.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The model to use (ignored by backends with a single model)
    pub model: String,
    pub prompts: Vec<Prompt>,
    pub examples: Vec<Example>,
    /// Start a fresh conversation instead of continuing the current one
    pub new_chat: bool,
}

// --- Replies ---

/// Tag accompanying every reply delivered to the consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NewReply,
    Failed,
}

/// A single item on a backend's reply channel.
///
/// A `NewReply` with empty text is the end-of-conversation signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub reason: ReasonCode,
}

impl ChatReply {
    pub fn new_reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reason: ReasonCode::NewReply,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reason: ReasonCode::Failed,
        }
    }

    /// The terminal item sent once after the last turn.
    pub fn done() -> Self {
        Self::new_reply("")
    }

    pub fn is_done(&self) -> bool {
        self.reason == ReasonCode::NewReply && self.text.is_empty()
    }
}

/// Rough cost of a request, as reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

// --- Messages (request/response backends) ---

/// The role of a message in a request/response conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a backend-held conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_marker() {
        assert!(ChatReply::done().is_done());
        assert!(!ChatReply::new_reply("x").is_done());
        assert!(!ChatReply::failed("").is_done());
    }

    #[test]
    fn test_example_deserialize_without_description() {
        let ex: Example = serde_json::from_str(r#"{"content":"print('hi')"}"#).unwrap();
        assert_eq!(ex.description, "");
        assert_eq!(ex.content, "print('hi')");
    }
}
