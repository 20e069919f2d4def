//! promptforge: compose prompts and generate code through LLM backends.
//!
//! The interesting part is the Slack bridge in [`llm::slack`], which drives a
//! Claude bot through a Slack channel by posting and polling, and the
//! [`dispatch`] / [`sink`] pair that keeps those long-running conversations
//! off the consumer's path.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod manager;
pub mod sink;
pub mod store;
pub mod types;
