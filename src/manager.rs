//! The manager: application context owning the backend registry.
//!
//! It is built once at startup and passed down explicitly. Construction
//! opens the result database and builds every known backend; only the ones
//! that report themselves valid are registered. The registry is read-only
//! afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::llm::openai_compatible::OpenAiBackend;
use crate::llm::slack::client::SlackWebClient;
use crate::llm::slack::SlackBridge;
use crate::llm::LlmBackend;
use crate::store::ResultDatabase;
use crate::types::{ChatReply, ChatRequest};

pub struct Manager {
    config: AppConfig,
    database: ResultDatabase,
    backends: BTreeMap<String, Arc<dyn LlmBackend>>,
    slack: Option<Arc<SlackBridge>>,
}

impl Manager {
    pub fn new(config: AppConfig) -> Result<Self> {
        let database = ResultDatabase::open(config.results_dir()?)?;

        let openai = Arc::new(OpenAiBackend::new(
            config.openai_key().unwrap_or_default(),
            config.openai.api_base.clone(),
        ));
        let slack_client = SlackWebClient::new(
            config.slack_token().unwrap_or_default(),
            config.slack.api_base.clone(),
        );
        let slack = Arc::new(SlackBridge::new(
            Arc::new(slack_client),
            config.slack.channel_id.clone(),
            config.slack.bot_id.clone(),
            config.poll.policy(),
        ));

        let mut manager = Self::with_backends(
            config,
            database,
            vec![openai as Arc<dyn LlmBackend>, slack.clone()],
        );
        if slack.is_valid() {
            manager.slack = Some(slack);
        }
        Ok(manager)
    }

    /// Build a manager from already constructed backends, dropping the
    /// invalid ones.
    pub fn with_backends(
        config: AppConfig,
        database: ResultDatabase,
        candidates: Vec<Arc<dyn LlmBackend>>,
    ) -> Self {
        let mut backends = BTreeMap::new();
        for backend in candidates {
            let supply = backend.supply_name().to_string();
            if backend.is_valid() {
                info!(supply = %supply, "backend registered");
                backends.insert(supply, backend);
            } else {
                info!(supply = %supply, "backend not configured, skipped");
            }
        }
        Self {
            config,
            database,
            backends,
            slack: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &ResultDatabase {
        &self.database
    }

    /// The Slack bridge, when it is configured.
    pub fn slack(&self) -> Option<&SlackBridge> {
        self.slack.as_deref()
    }

    pub fn backend(&self, supply: &str) -> Option<&Arc<dyn LlmBackend>> {
        self.backends.get(supply)
    }

    pub fn supply_names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Route a chat request to the backend registered as `supply`.
    ///
    /// An unknown supply is answered with a single `Failed` reply.
    pub fn chat_request(
        &self,
        supply: &str,
        request: ChatRequest,
    ) -> mpsc::UnboundedReceiver<ChatReply> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.backend(supply) {
            Some(backend) => backend.chat_request(request, tx),
            None => {
                warn!(supply, "cannot find valid api supply");
                let _ = tx.send(ChatReply::failed(format!(
                    "Cannot find valid api supply name {}",
                    supply
                )));
            }
        }
        rx
    }

    /// Model names of every registered backend, keyed by supply name.
    pub async fn get_all_models(&self) -> BTreeMap<String, Vec<String>> {
        let mut result = BTreeMap::new();
        for (supply, backend) in &self.backends {
            match backend.model_names().await {
                Ok(models) => {
                    result.insert(supply.clone(), models);
                }
                Err(e) => warn!(supply = %supply, error = %e, "failed to list models"),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CostEstimate, Prompt, ReasonCode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        name: &'static str,
        valid: bool,
        model_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str, valid: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                valid,
                model_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for FakeBackend {
        fn supply_name(&self) -> &str {
            self.name
        }

        async fn model_names(&self) -> Result<Vec<String>> {
            self.model_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{}-model", self.name)])
        }

        fn chat_request(&self, request: ChatRequest, replies: mpsc::UnboundedSender<ChatReply>) {
            for prompt in request.prompts {
                let _ = replies.send(ChatReply::new_reply(format!("echo {}", prompt.content)));
            }
            let _ = replies.send(ChatReply::done());
        }

        async fn embedding_request(&self, _model: &str, _input: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![])
        }

        fn estimate_cost(&self, _request: &ChatRequest) -> CostEstimate {
            CostEstimate::default()
        }

        fn is_valid(&self) -> bool {
            self.valid
        }
    }

    fn manager(backends: Vec<Arc<dyn LlmBackend>>) -> (Manager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let database = ResultDatabase::open(dir.path()).unwrap();
        (
            Manager::with_backends(AppConfig::default(), database, backends),
            dir,
        )
    }

    #[tokio::test]
    async fn test_registry_excludes_invalid_backends() {
        let good = FakeBackend::new("Good", true);
        let bad = FakeBackend::new("Bad", false);
        let (manager, _dir) = manager(vec![good.clone() as Arc<dyn LlmBackend>, bad.clone()]);

        assert_eq!(manager.supply_names(), vec!["Good".to_string()]);
        assert!(manager.backend("Bad").is_none());

        let models = manager.get_all_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models["Good"], vec!["Good-model".to_string()]);
        assert_eq!(good.model_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.model_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_request_routed_by_supply() {
        let (manager, _dir) = manager(vec![FakeBackend::new("Good", true) as Arc<dyn LlmBackend>]);
        let mut rx = manager.chat_request(
            "Good",
            ChatRequest {
                prompts: vec![Prompt::new("", "hi")],
                new_chat: true,
                ..Default::default()
            },
        );
        assert_eq!(rx.recv().await, Some(ChatReply::new_reply("echo hi")));
        assert_eq!(rx.recv().await, Some(ChatReply::done()));
    }

    #[tokio::test]
    async fn test_unknown_supply_fails() {
        let (manager, _dir) = manager(vec![FakeBackend::new("Good", true) as Arc<dyn LlmBackend>]);
        let mut rx = manager.chat_request("Missing", ChatRequest::default());
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.reason, ReasonCode::Failed);
        assert!(reply.text.contains("Missing"));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_new_without_credentials_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.results_dir = Some(dir.path().join("results"));
        config.openai.api_key_env = "PROMPTFORGE_TEST_UNSET_KEY".to_string();

        let manager = Manager::new(config).unwrap();
        assert!(manager.supply_names().is_empty());
        assert!(manager.slack().is_none());
        assert!(manager.database().dir().exists());
    }
}
