//! Slack Web API transport.
//!
//! The bridge only needs four primitives from Slack: list channels, post a
//! message (optionally as a thread reply), fetch channel history and fetch
//! the replies of a thread. They sit behind `SlackTransport` so tests can
//! swap in an in-memory channel.
//!
//! Every Web API response is an envelope `{ "ok": bool, "error": "...", ... }`;
//! `ok == false` becomes `SlackError::Api`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("Slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Slack API error: {0}")]
    Api(String),
}

/// A channel as returned by `conversations.list`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A message as returned by `conversations.history` / `conversations.replies`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SlackMessage {
    /// Author id; absent for some bot and system messages
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl SlackMessage {
    pub fn new(user: &str, text: &str, ts: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            text: text.to_string(),
            ts: ts.to_string(),
            thread_ts: None,
        }
    }
}

/// Result of `chat.postMessage`.
///
/// `ts` is `None` when the post did not go through; `text` is the message
/// as stored by Slack (mentions may be re-encoded).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostResult {
    pub ts: Option<String>,
    pub text: Option<String>,
}

/// The channel primitives the polling bridge is built on.
#[async_trait]
pub trait SlackTransport: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<SlackChannel>, SlackError>;

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostResult, SlackError>;

    async fn channel_history(&self, channel: &str) -> Result<Vec<SlackMessage>, SlackError>;

    async fn thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<SlackMessage>, SlackError>;
}

// --- API Types ---

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, SlackError> {
        if self.ok {
            Ok(self.body)
        } else {
            Err(SlackError::Api(
                self.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }
}

#[derive(Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Deserialize, Debug, Default)]
struct PostMessageBody {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    message: Option<PostedText>,
}

#[derive(Deserialize, Debug, Default)]
struct PostedText {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChannelsBody {
    #[serde(default)]
    channels: Vec<SlackChannel>,
}

#[derive(Deserialize, Debug, Default)]
struct MessagesBody {
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

// --- Implementation ---

/// `SlackTransport` over the Slack Web API.
pub struct SlackWebClient {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl SlackWebClient {
    pub fn new(token: String, api_base: Option<String>) -> Self {
        Self {
            token,
            api_base: api_base.unwrap_or_else(|| "https://slack.com/api".to_string()),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), method)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SlackError> {
        let envelope: Envelope<T> = self
            .client
            .get(self.url(method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        envelope.into_result()
    }
}

#[async_trait]
impl SlackTransport for SlackWebClient {
    async fn list_channels(&self) -> Result<Vec<SlackChannel>, SlackError> {
        let body: ChannelsBody = self.get("conversations.list", &[]).await?;
        Ok(body.channels)
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostResult, SlackError> {
        let request = PostMessageRequest {
            channel,
            text,
            thread_ts,
        };
        let envelope: Envelope<PostMessageBody> = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let body = envelope.into_result()?;
        Ok(PostResult {
            ts: body.ts.filter(|ts| !ts.is_empty()),
            text: body.message.and_then(|m| m.text),
        })
    }

    async fn channel_history(&self, channel: &str) -> Result<Vec<SlackMessage>, SlackError> {
        let body: MessagesBody = self
            .get("conversations.history", &[("channel", channel)])
            .await?;
        Ok(body.messages)
    }

    async fn thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<SlackMessage>, SlackError> {
        let body: MessagesBody = self
            .get(
                "conversations.replies",
                &[
                    ("channel", channel),
                    ("ts", thread_ts),
                    ("include_all_metadata", "true"),
                ],
            )
            .await?;
        Ok(body.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_envelope_ok() {
        let json = r#"{"ok":true,"channel":"C1","ts":"1700000000.000100",
            "message":{"text":"hello <@U0BOT>","user":"U0ME"}}"#;
        let env: Envelope<PostMessageBody> = serde_json::from_str(json).unwrap();
        let body = env.into_result().unwrap();
        assert_eq!(body.ts.as_deref(), Some("1700000000.000100"));
        assert_eq!(
            body.message.and_then(|m| m.text).as_deref(),
            Some("hello <@U0BOT>")
        );
    }

    #[test]
    fn test_envelope_error() {
        let json = r#"{"ok":false,"error":"channel_not_found"}"#;
        let env: Envelope<PostMessageBody> = serde_json::from_str(json).unwrap();
        let err = env.into_result().unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[test]
    fn test_replies_without_user_field() {
        let json = r#"{"ok":true,"messages":[
            {"user":"U1","text":"hi","ts":"1.0","thread_ts":"1.0"},
            {"bot_id":"B1","text":"joined","ts":"2.0"}]}"#;
        let env: Envelope<MessagesBody> = serde_json::from_str(json).unwrap();
        let messages = env.into_result().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].user.as_deref(), Some("U1"));
        assert_eq!(messages[1].user, None);
    }

    #[test]
    fn test_channels_body() {
        let json = r#"{"ok":true,"channels":[{"id":"C1","name":"general","is_private":false}]}"#;
        let env: Envelope<ChannelsBody> = serde_json::from_str(json).unwrap();
        let channels = env.into_result().unwrap().channels;
        assert_eq!(channels, vec![SlackChannel { id: "C1".into(), name: "general".into() }]);
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = SlackWebClient::new("xoxb".into(), Some("http://localhost:9/api/".into()));
        assert_eq!(client.url("chat.postMessage"), "http://localhost:9/api/chat.postMessage");
    }

    #[tokio::test]
    async fn test_post_message_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_header("authorization", "Bearer xoxb-test")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"channel":"C1","text":"hi <@UBOT>","thread_ts":"1.0"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"ts":"2.0","message":{"text":"hi <@UBOT>"}}"#)
            .create_async()
            .await;

        let client = SlackWebClient::new("xoxb-test".into(), Some(server.url()));
        let posted = client.post_message("C1", "hi <@UBOT>", Some("1.0")).await.unwrap();
        assert_eq!(posted.ts.as_deref(), Some("2.0"));
        assert_eq!(posted.text.as_deref(), Some("hi <@UBOT>"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_thread_replies_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/conversations.replies")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error":"thread_not_found"}"#)
            .create_async()
            .await;

        let client = SlackWebClient::new("xoxb-test".into(), Some(server.url()));
        let err = client.thread_replies("C1", "1.0").await.unwrap_err();
        assert!(matches!(err, SlackError::Api(ref code) if code == "thread_not_found"));
    }
}
