//! Completion calls with retry, typing feedback and billing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::channels::{Channel, ChatAction};
use crate::config::AiConfig;
use crate::error::LlmError;
use crate::llm::costs::CostTable;
use crate::llm::provider::{ChatMessage, ChatRequest, CompletionBackend, TokenUsage};
use crate::llm::retry::{RetryPolicy, retry_with_backoff};
use crate::store::{BillingRecord, Database};
use crate::typing::TypingIndicator;

/// Who a completion is billed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallIdentity {
    pub chat_id: i64,
    pub user_id: i64,
}

/// A cleaned-up completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Model parameters for every call.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub costs: CostTable,
}

impl From<&AiConfig> for ExecutorSettings {
    fn from(config: &AiConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy::new(config.retry_attempts, config.retry_base_delay),
            costs: config.costs.clone(),
        }
    }
}

/// Drop anything from the first `--` on (signature-style footers) and trim.
pub fn clean_reply(raw: &str) -> String {
    let body = raw.split_once("--").map_or(raw, |(head, _)| head);
    body.trim().to_string()
}

/// Runs completion requests against a backend.
pub struct AiExecutor {
    backend: Arc<dyn CompletionBackend>,
    channel: Option<Arc<dyn Channel>>,
    db: Option<Arc<dyn Database>>,
    settings: ExecutorSettings,
}

impl AiExecutor {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: ExecutorSettings) -> Self {
        Self {
            backend,
            channel: None,
            db: None,
            settings,
        }
    }

    /// Show "typing…" in the caller's chat while a request is in flight.
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Record billing rows for calls that report token usage.
    pub fn with_billing(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// One system prompt and one user message.
    pub async fn prompt(
        &self,
        system: &str,
        user: &str,
        identity: CallIdentity,
    ) -> Result<Completion, LlmError> {
        self.complete(
            vec![ChatMessage::system(system), ChatMessage::user(user)],
            identity,
        )
        .await
    }

    /// Send `messages` as one completion request.
    ///
    /// Transport failures and responses without choices are retried with
    /// exponential backoff. Once the budget is spent the last failure is
    /// wrapped in [`LlmError::Exhausted`].
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        identity: CallIdentity,
    ) -> Result<Completion, LlmError> {
        let _typing = match self.channel {
            Some(ref channel) => Some(
                TypingIndicator::start(Arc::clone(channel), identity.chat_id, ChatAction::Typing)
                    .await,
            ),
            None => None,
        };

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let backend = &self.backend;
        let request_ref = &request;
        let policy = self.settings.retry;
        let response = retry_with_backoff(&policy, "completion", |attempt| async move {
            debug!(attempt, model = %request_ref.model, "Sending completion request");
            let response = backend.send(request_ref).await?;
            if response.choices.is_empty() {
                return Err(LlmError::EmptyResponse {
                    provider: "completion".into(),
                });
            }
            Ok(response)
        })
        .await
        .map_err(|last| LlmError::Exhausted {
            attempts: policy.max_attempts,
            last: Box::new(last),
        })?;

        let text = clean_reply(response.first_content().unwrap_or_default());
        let model = if response.model.is_empty() {
            self.settings.model.clone()
        } else {
            response.model.clone()
        };

        if response.usage.total_tokens > 0 {
            self.record_billing(identity, &model, response.usage).await;
        }

        Ok(Completion {
            text,
            model,
            usage: response.usage,
        })
    }

    /// Billing failures never fail the call.
    async fn record_billing(&self, identity: CallIdentity, model: &str, usage: TokenUsage) {
        let Some(ref db) = self.db else {
            return;
        };

        let cost = self.settings.costs.cost(model, usage.total_tokens);
        let record = BillingRecord {
            user_id: identity.user_id,
            chat_id: identity.chat_id,
            timestamp: Utc::now(),
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cost,
        };

        match db.insert_billing_record(&record).await {
            Ok(()) => info!(
                chat_id = identity.chat_id,
                user_id = identity.user_id,
                model,
                tokens = usage.total_tokens,
                cost = %cost,
                "Completion billed"
            ),
            Err(e) => warn!(
                chat_id = identity.chat_id,
                user_id = identity.user_id,
                error = %e,
                "Failed to record billing"
            ),
        }
    }
}
