//! Slack-bridged Claude backend.
//!
//! Claude is reachable here only as a bot invited into a Slack channel, so a
//! chat turn is emulated with two primitives: post a message that mentions
//! the bot, then poll the thread until the bot's answer shows up. While the
//! bot is working it keeps a "Typing…" placeholder in the thread, which must
//! not be mistaken for the answer.
//!
//! ```text
//! post(context) ──poll──> reply ──> post(example 1) ──poll──> reply ──> ... ──> post(prompt) ──poll──> reply
//! ```
//!
//! Turns are strictly sequential: turn N+1 is posted only after turn N's
//! reply is resolved (found, or timed out).

pub mod client;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use self::client::{PostResult, SlackChannel, SlackMessage, SlackTransport};
use super::{LlmBackend, LlmError, NO_PROMPT_MESSAGE};
use crate::dispatch::Dispatcher;
use crate::types::{ChatReply, ChatRequest, CostEstimate, Example, Prompt};

pub const SUPPLY_NAME: &str = "Slack";

/// Context posted at the start of a new chat when no prompt carries one.
pub const DEFAULT_CONTEXT: &str = "I want you to be a expert at python programming.";
pub const POST_TIMEOUT_MESSAGE: &str = "Request slack api Timeout!";
pub const REPLY_TIMEOUT_MESSAGE: &str = "get claude reply timeout!";
pub const EMPTY_REPLY_MESSAGE: &str = "Sorry, I can't understand you. The reply is None.";

const TYPING_SUFFIXES: [&str; 2] = ["Typing…", "Typing…_"];

/// Time-boxed retry settings for posting and reply polling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Wait between failed post attempts
    pub post_interval: Duration,
    /// Total time allowed for posting one message
    pub post_budget: Duration,
    /// Wait after a successful post before the first poll
    pub reply_delay: Duration,
    /// Wait between polls that found no reply
    pub reply_interval: Duration,
    /// Total time allowed for the reply to appear
    pub reply_budget: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            post_interval: Duration::from_secs(5),
            post_budget: Duration::from_secs(300),
            reply_delay: Duration::from_secs(1),
            reply_interval: Duration::from_secs(5),
            reply_budget: Duration::from_secs(300),
        }
    }
}

/// The record of the last message this bridge posted.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub ts: String,
    /// Text as stored by Slack; used as the anchor when reading replies
    pub text: String,
}

/// State of the current Slack thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    /// Timestamp of the thread root; stable until a new chat
    pub conversation_ts: Option<String>,
    pub reply: Option<PostedMessage>,
}

impl Conversation {
    fn reset(&mut self) {
        self.conversation_ts = None;
        self.reply = None;
    }
}

/// Render `n` with its English ordinal suffix ("1st", "12th", "22nd").
pub fn ordinal(n: usize) -> String {
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", n, suffix)
}

fn is_typing(text: &str) -> bool {
    TYPING_SUFFIXES.iter().any(|suffix| text.ends_with(suffix))
}

/// Pick the bot's answer to `anchor` out of a thread listing.
///
/// Scans newest-first. Bot messages that are not typing placeholders become
/// the candidate; the scan stops at the first message whose text equals the
/// anchor. Without the anchor the candidate could be a stale answer to an
/// earlier message, so nothing is returned.
pub fn last_reply(messages: &[SlackMessage], bot_id: &str, anchor: Option<&str>) -> Option<String> {
    let mut candidate = None;
    for message in messages.iter().rev() {
        if message.user.as_deref() == Some(bot_id) {
            if is_typing(&message.text) {
                continue;
            }
            candidate = Some(message.text.clone());
        }
        if anchor == Some(message.text.as_str()) {
            return candidate;
        }
    }
    None
}

/// Context for a new chat: the first non-empty `system` field.
fn conversation_context(prompts: &[Prompt]) -> String {
    prompts
        .iter()
        .find(|p| !p.system.is_empty())
        .map(|p| p.system.clone())
        .unwrap_or_else(|| DEFAULT_CONTEXT.to_string())
}

fn example_message(index: usize, example: &Example) -> String {
    let order = ordinal(index);
    if example.description.is_empty() {
        format!("This is {} example, please read it: {}", order, example.content)
    } else {
        format!(
            "This is {} example, the description is: {}, the example is: \"\"\"{}\"\"\", please read it.",
            order, example.description, example.content
        )
    }
}

fn send_turn_reply(replies: &mpsc::UnboundedSender<ChatReply>, reply: String) {
    let item = if reply.is_empty() {
        ChatReply::failed(EMPTY_REPLY_MESSAGE)
    } else {
        ChatReply::new_reply(reply)
    };
    let _ = replies.send(item);
}

/// Everything the worker task needs; shared between the bridge and its task.
struct BridgeCore {
    transport: Arc<dyn SlackTransport>,
    channel_id: String,
    bot_id: String,
    mention: String,
    policy: PollPolicy,
    conversation: Mutex<Conversation>,
}

impl BridgeCore {
    async fn get_last_message(&self, conversation: &Conversation, thread_ts: &str) -> Option<String> {
        let messages = match self.transport.thread_replies(&self.channel_id, thread_ts).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, thread_ts, "failed to fetch thread replies");
                return None;
            }
        };
        let anchor = conversation.reply.as_ref().map(|r| r.text.as_str());
        last_reply(&messages, &self.bot_id, anchor)
    }

    /// Post `message` (with the bot mention) and wait for the bot's answer.
    ///
    /// Timeouts come back as fixed strings rather than errors, so the
    /// conversation carries on with the next turn.
    async fn post_message(
        &self,
        conversation: &mut Conversation,
        message: &str,
        thread_ts: Option<&str>,
    ) -> String {
        let text = format!("{}{}", message, self.mention);
        let policy = &self.policy;

        let post_interval = policy.post_interval.max(Duration::from_millis(1));
        let mut budget = policy.post_budget;
        let posted = loop {
            match self.transport.post_message(&self.channel_id, &text, thread_ts).await {
                Ok(PostResult { ts: Some(ts), text: echoed }) => {
                    break PostedMessage {
                        ts,
                        text: echoed.unwrap_or_else(|| text.clone()),
                    };
                }
                Ok(_) => warn!("post returned no timestamp, retrying"),
                Err(e) => warn!(error = %e, "failed to post message, retrying"),
            }
            tokio::time::sleep(post_interval).await;
            budget = budget.saturating_sub(post_interval);
            if budget.is_zero() {
                return POST_TIMEOUT_MESSAGE.to_string();
            }
        };

        let thread = conversation
            .conversation_ts
            .get_or_insert_with(|| posted.ts.clone())
            .clone();
        debug!(ts = %posted.ts, thread = %thread, "message posted");
        conversation.reply = Some(posted);

        tokio::time::sleep(policy.reply_delay).await;
        let reply_interval = policy.reply_interval.max(Duration::from_millis(1));
        let mut budget = policy.reply_budget;
        loop {
            match self.get_last_message(conversation, &thread).await {
                Some(reply) if !reply.is_empty() => return reply,
                _ => debug!(thread = %thread, "no reply yet"),
            }
            tokio::time::sleep(reply_interval).await;
            budget = budget.saturating_sub(reply_interval);
            if budget.is_zero() {
                return REPLY_TIMEOUT_MESSAGE.to_string();
            }
        }
    }

    /// Post as a new thread root for the first message, in-thread afterwards.
    async fn start_conversation(&self, conversation: &mut Conversation, message: &str) -> String {
        let thread_ts = match conversation.reply {
            None => None,
            Some(_) => conversation.conversation_ts.clone(),
        };
        self.post_message(conversation, message, thread_ts.as_deref()).await
    }

    /// Post one request's turns. The terminal reply comes from the dispatcher.
    async fn run(&self, request: ChatRequest, replies: mpsc::UnboundedSender<ChatReply>) {
        let mut conversation = self.conversation.lock().await;
        let ChatRequest {
            mut prompts,
            mut examples,
            new_chat,
            ..
        } = request;
        let context = conversation_context(&prompts);

        if new_chat {
            conversation.reset();
            info!("starting new chat");
            let reply = self.start_conversation(&mut conversation, &context).await;
            let _ = replies.send(ChatReply::new_reply(reply));
        } else {
            examples.clear();
            let last = prompts.len().saturating_sub(1);
            prompts = prompts.split_off(last);
        }

        for (index, example) in examples.iter().enumerate() {
            info!(example = index + 1, "posting example");
            let message = example_message(index + 1, example);
            let reply = self.start_conversation(&mut conversation, &message).await;
            send_turn_reply(&replies, reply);
        }

        for prompt in &prompts {
            info!("posting prompt");
            let reply = self.start_conversation(&mut conversation, &prompt.content).await;
            send_turn_reply(&replies, reply);
        }
    }
}

/// A chat backend that talks to a Claude bot through a Slack channel.
pub struct SlackBridge {
    core: Arc<BridgeCore>,
    dispatcher: Dispatcher,
}

impl SlackBridge {
    pub fn new(
        transport: Arc<dyn SlackTransport>,
        channel_id: impl Into<String>,
        bot_id: impl Into<String>,
        policy: PollPolicy,
    ) -> Self {
        let bot_id = bot_id.into();
        let core = BridgeCore {
            transport,
            channel_id: channel_id.into(),
            mention: format!(" <@{}>", bot_id),
            bot_id,
            policy,
            conversation: Mutex::new(Conversation::default()),
        };
        Self {
            core: Arc::new(core),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Find the id of the channel called `name`.
    pub async fn find_conversation(&self, name: &str) -> Result<Option<String>> {
        let channels = self.list_channels().await?;
        Ok(channels.into_iter().find(|c| c.name == name).map(|c| c.id))
    }

    pub async fn list_channels(&self) -> Result<Vec<SlackChannel>> {
        Ok(self.core.transport.list_channels().await?)
    }

    /// Top-level messages of the configured channel.
    pub async fn history(&self) -> Result<Vec<SlackMessage>> {
        Ok(self.core.transport.channel_history(&self.core.channel_id).await?)
    }

    /// The bot's answer to the last posted message in `thread_ts`, if any.
    ///
    /// Waits for a running chat to release the conversation first.
    pub async fn get_last_message(&self, thread_ts: &str) -> Option<String> {
        let conversation = self.core.conversation.lock().await;
        self.core.get_last_message(&conversation, thread_ts).await
    }

    /// Snapshot of the current conversation state.
    pub async fn conversation(&self) -> Conversation {
        self.core.conversation.lock().await.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.dispatcher.is_busy()
    }
}

#[async_trait]
impl LlmBackend for SlackBridge {
    fn supply_name(&self) -> &str {
        SUPPLY_NAME
    }

    async fn model_names(&self) -> Result<Vec<String>> {
        Ok(vec!["claude".to_string()])
    }

    fn chat_request(&self, request: ChatRequest, replies: mpsc::UnboundedSender<ChatReply>) {
        if self.dispatcher.is_busy() {
            let _ = replies.send(ChatReply::failed(super::BUSY_MESSAGE));
            return;
        }
        if request.prompts.is_empty() {
            let _ = replies.send(ChatReply::failed(NO_PROMPT_MESSAGE));
            return;
        }
        let core = self.core.clone();
        let worker_replies = replies.clone();
        self.dispatcher
            .dispatch(&replies, async move { core.run(request, worker_replies).await });
    }

    async fn embedding_request(&self, _model: &str, _input: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(LlmError::Unsupported {
            supply: SUPPLY_NAME.to_string(),
            operation: "embedding request",
        }
        .into())
    }

    fn estimate_cost(&self, _request: &ChatRequest) -> CostEstimate {
        CostEstimate::default()
    }

    fn is_valid(&self) -> bool {
        !self.core.channel_id.is_empty() && !self.core.bot_id.is_empty()
    }
}
