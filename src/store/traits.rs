//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::DatabaseError;

/// A chat seen by the bot.
#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub id: i64,
    pub title: String,
    pub kind: String,
    pub username: Option<String>,
}

/// A user seen by the bot.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// A message to append to the durable chat log.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A logged message joined with its author's display name.
#[derive(Debug, Clone)]
pub struct ChatLogEntry {
    pub user_id: i64,
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Message counts for a chat.
#[derive(Debug, Clone, Default)]
pub struct MessageStats {
    pub total: u64,
    pub last_day: u64,
    /// (display name, message count), busiest first.
    pub top_users: Vec<(String, u64)>,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// One role-tagged utterance in a (chat, user) conversation.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub chat_id: i64,
    pub user_id: i64,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounds for a context window read. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextWindow {
    pub max_turns: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

/// Record of one billed completion call.
#[derive(Debug, Clone)]
pub struct BillingRecord {
    pub user_id: i64,
    pub chat_id: i64,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: Decimal,
}

/// Aggregated billing figures.
#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: Decimal,
    pub call_count: u64,
}

/// Per-user spend.
#[derive(Debug, Clone)]
pub struct UserUsage {
    pub user_id: i64,
    pub name: String,
    pub total_tokens: u64,
    pub cost: Decimal,
}

/// A persisted captcha challenge.
#[derive(Debug, Clone)]
pub struct CaptchaRecord {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub question: String,
    pub answer: i64,
    pub sent_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub is_correct: bool,
}

/// A new captcha challenge to persist.
#[derive(Debug, Clone)]
pub struct NewCaptcha {
    pub chat_id: i64,
    pub user_id: i64,
    pub question: String,
    pub answer: i64,
    pub sent_at: DateTime<Utc>,
}

/// A "thank you" from one member to another.
#[derive(Debug, Clone)]
pub struct ThanksRecord {
    pub chat_id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: i64,
}

/// Audit row for a message classified as spam.
#[derive(Debug, Clone)]
pub struct SpamIncident {
    pub chat_id: i64,
    pub user_id: i64,
    pub message_text: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Chats & users ───────────────────────────────────────────────

    /// Create the chat if absent. Existing rows are left untouched.
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<(), DatabaseError>;

    /// Create the user if absent. Existing rows are left untouched.
    async fn upsert_user(&self, user: &UserRecord) -> Result<(), DatabaseError>;

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, DatabaseError>;

    /// Per-user custom system prompt, if one was set.
    async fn get_user_ai_info(&self, user_id: i64) -> Result<Option<String>, DatabaseError>;

    async fn set_user_ai_info(&self, user_id: i64, info: &str) -> Result<(), DatabaseError>;

    /// Whether the user holds the `admin` role in this chat.
    async fn has_admin_role(&self, chat_id: i64, user_id: i64) -> Result<bool, DatabaseError>;

    async fn set_user_role(
        &self,
        chat_id: i64,
        user_id: i64,
        role: &str,
    ) -> Result<(), DatabaseError>;

    // ── Message log ─────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<(), DatabaseError>;

    /// Most recent messages at or after `since`, newest first.
    async fn recent_messages(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError>;

    async fn message_stats(
        &self,
        chat_id: i64,
        day_start: DateTime<Utc>,
    ) -> Result<MessageStats, DatabaseError>;

    /// Delete messages older than `cutoff`. Returns the number removed.
    async fn purge_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // ── Conversation context ────────────────────────────────────────

    async fn append_context_turn(&self, turn: &ConversationTurn) -> Result<(), DatabaseError>;

    /// Turns for the pair inside the window, newest first.
    async fn read_context_window(
        &self,
        chat_id: i64,
        user_id: i64,
        window: ContextWindow,
    ) -> Result<Vec<ConversationTurn>, DatabaseError>;

    async fn delete_context(&self, chat_id: i64, user_id: i64) -> Result<u64, DatabaseError>;

    async fn purge_context_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // ── Billing ─────────────────────────────────────────────────────

    async fn insert_billing_record(&self, record: &BillingRecord) -> Result<(), DatabaseError>;

    async fn billing_usage_by_chat(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<UsageSummary, DatabaseError>;

    async fn billing_usage_by_user(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<UsageSummary, DatabaseError>;

    /// Biggest spenders in a chat, most expensive first.
    async fn billing_top_users(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserUsage>, DatabaseError>;

    // ── Captcha ─────────────────────────────────────────────────────

    async fn insert_captcha(&self, captcha: &NewCaptcha) -> Result<i64, DatabaseError>;

    /// The pair's newest challenge, if it is still unanswered. Older
    /// unanswered rows are superseded and never returned.
    async fn latest_unanswered_captcha(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Option<CaptchaRecord>, DatabaseError>;

    async fn mark_captcha_answered(
        &self,
        id: i64,
        is_correct: bool,
        answered_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn has_passed_captcha(&self, chat_id: i64, user_id: i64)
    -> Result<bool, DatabaseError>;

    // ── Moderation ──────────────────────────────────────────────────

    async fn insert_thanks(&self, thanks: &ThanksRecord) -> Result<(), DatabaseError>;

    /// How many thanks the user has received in this chat.
    async fn thanks_received(&self, chat_id: i64, user_id: i64) -> Result<u64, DatabaseError>;

    /// (display name, thanks received), most thanked first.
    async fn top_thanked(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, DatabaseError>;

    async fn insert_spam_incident(&self, incident: &SpamIncident) -> Result<(), DatabaseError>;
}
