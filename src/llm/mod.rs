//! LLM backend module.
//!
//! This module defines the `LlmBackend` trait that every supply (OpenAI,
//! the Slack-bridged Claude, ...) implements, and the concrete backends.
//!
//! Key concepts:
//! - **Supply**: a named backend; the manager routes requests by this name
//! - **Reply channel**: `chat_request` never blocks; it spawns its work and
//!   delivers `ChatReply` items over an unbounded channel
//! - **Validity**: backends without credentials report `is_valid() == false`
//!   and are left out of the registry

pub mod openai_compatible;
pub mod slack;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{ChatReply, ChatRequest, CostEstimate};

/// Reply sent when a chat is requested while another one is still running.
pub const BUSY_MESSAGE: &str = "Chat is running, please wait.";
/// Reply sent when a chat is requested without any prompt.
pub const NO_PROMPT_MESSAGE: &str = "No prompts, Generate exit.";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("{operation} is not implemented by the {supply} backend")]
    Unsupported {
        supply: String,
        operation: &'static str,
    },
}

/// Trait that all LLM backends must implement.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// The supply name this backend is registered under.
    fn supply_name(&self) -> &str;

    /// List the model names this backend can serve.
    async fn model_names(&self) -> Result<Vec<String>>;

    /// Start a chat request and return immediately.
    ///
    /// Replies arrive on `replies`: one or more `NewReply` items followed by
    /// a terminal empty `NewReply`, or a single `Failed` when the request is
    /// rejected.
    fn chat_request(&self, request: ChatRequest, replies: mpsc::UnboundedSender<ChatReply>);

    /// Compute embeddings for `input`.
    async fn embedding_request(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Estimate what `request` would cost on this backend.
    fn estimate_cost(&self, request: &ChatRequest) -> CostEstimate;

    /// Whether the backend has the minimum configuration to be used.
    fn is_valid(&self) -> bool;
}
