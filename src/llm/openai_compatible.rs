//! OpenAI-compatible LLM backend.
//!
//! A plain request/response backend: every turn is one `chat/completions`
//! call. It keeps its own message history so a chat can be continued with
//! `new_chat == false`, and it honours the same reply-channel contract as the
//! Slack bridge.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::{LlmBackend, BUSY_MESSAGE, NO_PROMPT_MESSAGE};
use crate::dispatch::Dispatcher;
use crate::types::{ChatReply, ChatRequest, CostEstimate, Message, Role};

pub const SUPPLY_NAME: &str = "OpenAI";

// --- API Request Types (OpenAI format) ---

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

// --- API Response Types ---

#[derive(Deserialize, Debug)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize, Debug)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

// --- Implementation ---

struct OpenAiCore {
    api_key: String,
    api_base: String,
    client: reqwest::Client,
    history: Mutex<Vec<Message>>,
}

fn build_api_request(model: &str, messages: &[Message]) -> ApiRequest {
    let messages = messages
        .iter()
        .map(|msg| ApiMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: msg.content.clone(),
        })
        .collect();
    ApiRequest {
        model: model.to_string(),
        messages,
    }
}

fn parse_response(api_response: ApiResponse) -> Result<String> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .context("Empty response from API: no choices returned")?;
    Ok(choice.message.content.unwrap_or_default())
}

/// Price per 1K tokens for the model families we know about.
fn price_per_1k(model: &str) -> f64 {
    if model.starts_with("gpt-4o-mini") {
        0.00015
    } else if model.starts_with("gpt-4o") {
        0.0025
    } else if model.starts_with("gpt-4") {
        0.03
    } else if model.starts_with("gpt-3.5") {
        0.0015
    } else {
        0.0
    }
}

impl OpenAiCore {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn chat_completion(&self, model: &str, messages: &[Message]) -> Result<String> {
        let api_request = build_api_request(model, messages);
        let url = self.url("chat/completions");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_body);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .context("Failed to parse API response")?;

        parse_response(api_response)
    }

    async fn run(&self, request: ChatRequest, replies: mpsc::UnboundedSender<ChatReply>) {
        let mut history = self.history.lock().await;
        if request.new_chat {
            history.clear();
            if let Some(system) = request.prompts.iter().find(|p| !p.system.is_empty()) {
                history.push(Message::system(&system.system));
            }
            for (index, example) in request.examples.iter().enumerate() {
                let text = if example.description.is_empty() {
                    format!("Example {}:\n{}", index + 1, example.content)
                } else {
                    format!(
                        "Example {} ({}):\n{}",
                        index + 1,
                        example.description,
                        example.content
                    )
                };
                history.push(Message::user(text));
            }
        }

        let prompts = if request.new_chat {
            &request.prompts[..]
        } else {
            &request.prompts[request.prompts.len().saturating_sub(1)..]
        };
        for prompt in prompts {
            history.push(Message::user(&prompt.content));
            info!(model = %request.model, "sending chat completion");
            match self.chat_completion(&request.model, &history).await {
                Ok(content) if !content.is_empty() => {
                    history.push(Message::assistant(&content));
                    let _ = replies.send(ChatReply::new_reply(content));
                }
                Ok(_) => {
                    let _ = replies.send(ChatReply::failed("The model returned an empty reply."));
                }
                Err(e) => {
                    warn!(error = %e, "chat completion failed");
                    let _ = replies.send(ChatReply::failed(format!("{:#}", e)));
                }
            }
        }
    }
}

/// Backend for OpenAI and APIs that mimic it.
pub struct OpenAiBackend {
    core: Arc<OpenAiCore>,
    dispatcher: Dispatcher,
}

impl OpenAiBackend {
    pub fn new(api_key: String, api_base: Option<String>) -> Self {
        let core = OpenAiCore {
            api_key,
            api_base: api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            client: reqwest::Client::new(),
            history: Mutex::new(Vec::new()),
        };
        Self {
            core: Arc::new(core),
            dispatcher: Dispatcher::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn supply_name(&self) -> &str {
        SUPPLY_NAME
    }

    async fn model_names(&self) -> Result<Vec<String>> {
        let url = self.core.url("models");
        let list: ModelList = self
            .core
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.core.api_key))
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse model list")?;
        let mut names: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        names.sort();
        Ok(names)
    }

    fn chat_request(&self, request: ChatRequest, replies: mpsc::UnboundedSender<ChatReply>) {
        if self.dispatcher.is_busy() {
            let _ = replies.send(ChatReply::failed(BUSY_MESSAGE));
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

    async fn embedding_request(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.core.url("embeddings");
        let response: EmbeddingResponse = self
            .core
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.core.api_key))
            .json(&EmbeddingRequest { model, input })
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse embedding response")?;
        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    /// Counts roughly four characters per token; completion assumed equal
    /// to the prompt size.
    fn estimate_cost(&self, request: &ChatRequest) -> CostEstimate {
        let chars: usize = request
            .prompts
            .iter()
            .map(|p| p.system.len() + p.content.len())
            .chain(
                request
                    .examples
                    .iter()
                    .map(|e| e.description.len() + e.content.len()),
            )
            .sum();
        let prompt_tokens = (chars as u64).div_ceil(4);
        let completion_tokens = prompt_tokens;
        let cost_usd =
            (prompt_tokens + completion_tokens) as f64 / 1000.0 * price_per_1k(&request.model);
        CostEstimate {
            prompt_tokens,
            completion_tokens,
            cost_usd,
        }
    }

    fn is_valid(&self) -> bool {
        !self.core.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Example, Prompt, ReasonCode};

    async fn collect(mut rx: mpsc::UnboundedReceiver<ChatReply>) -> Vec<ChatReply> {
        let mut out = Vec::new();
        while let Some(reply) = rx.recv().await {
            out.push(reply);
        }
        out
    }

    #[test]
    fn test_build_api_request_roles() {
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let request = build_api_request("gpt-4o", &messages);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][2]["content"], "hello");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let response: ApiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parse_response(response).is_err());
    }

    #[test]
    fn test_estimate_cost() {
        let backend = OpenAiBackend::new("sk-test".into(), None);
        let request = ChatRequest {
            model: "gpt-4".into(),
            prompts: vec![Prompt::new("", "12345678")],
            examples: vec![Example::new("", "abcd")],
            new_chat: true,
        };
        let estimate = backend.estimate_cost(&request);
        assert_eq!(estimate.prompt_tokens, 3);
        assert_eq!(estimate.completion_tokens, 3);
        assert!((estimate.cost_usd - 0.00018).abs() < 1e-9);
    }

    #[test]
    fn test_validity_requires_key() {
        assert!(OpenAiBackend::new("sk-test".into(), None).is_valid());
        assert!(!OpenAiBackend::new(String::new(), None).is_valid());
    }

    #[tokio::test]
    async fn test_chat_request_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"def f(): pass"}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let backend = OpenAiBackend::new("sk-test".into(), Some(server.url()));
        let (tx, rx) = mpsc::unbounded_channel();
        backend.chat_request(
            ChatRequest {
                model: "gpt-4o".into(),
                prompts: vec![Prompt::new("You write Python.", "write a function")],
                examples: vec![Example::new("", "print('hi')")],
                new_chat: true,
            },
            tx,
        );

        let replies = collect(rx).await;
        assert_eq!(
            replies,
            vec![ChatReply::new_reply("def f(): pass"), ChatReply::done()]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_request_api_error_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let backend = OpenAiBackend::new("sk-test".into(), Some(server.url()));
        let (tx, rx) = mpsc::unbounded_channel();
        backend.chat_request(
            ChatRequest {
                prompts: vec![Prompt::new("", "hi")],
                new_chat: true,
                ..Default::default()
            },
            tx,
        );

        let replies = collect(rx).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].reason, ReasonCode::Failed);
        assert!(replies[0].text.contains("401"));
        assert!(replies[1].is_done());
    }

    #[tokio::test]
    async fn test_model_names_sorted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"object":"list","data":[{"id":"gpt-4o"},{"id":"gpt-3.5-turbo"}]}"#)
            .create_async()
            .await;

        let backend = OpenAiBackend::new("sk-test".into(), Some(server.url()));
        let names = backend.model_names().await.unwrap();
        assert_eq!(names, vec!["gpt-3.5-turbo".to_string(), "gpt-4o".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_prompt_rejected() {
        let backend = OpenAiBackend::new("sk-test".into(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        backend.chat_request(ChatRequest::default(), tx);
        assert_eq!(collect(rx).await, vec![ChatReply::failed(NO_PROMPT_MESSAGE)]);
    }
}
