//! libSQL implementation of the async `Database` trait.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! unix seconds; ties are broken by the autoincrement id so "newest first"
//! stays deterministic for rows written within the same second.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    BillingRecord, CaptchaRecord, ChatLogEntry, ChatRecord, ContextWindow, ConversationTurn,
    Database, MessageStats, NewCaptcha, NewMessage, SpamIncident, ThanksRecord, TurnRole,
    UsageSummary, UserRecord, UserUsage,
};

/// SQL expression for a user's display name, given `users` aliased as `u`.
const AUTHOR_NAME_SQL: &str = "COALESCE(CASE WHEN u.username IS NOT NULL AND u.username != '' THEN '@' || u.username END, NULLIF(TRIM(u.first_name || ' ' || COALESCE(u.last_name, '')), ''), 'Unknown')";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-value `COUNT(*)` style query.
    async fn count(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    /// Count rows in a table. Used by tests and diagnostics.
    pub async fn table_row_count(&self, table: &str) -> Result<u64, DatabaseError> {
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DatabaseError::Query(format!("invalid table name {table:?}")));
        }
        self.count(
            "table_row_count",
            &format!("SELECT COUNT(*) FROM {table}"),
            (),
        )
        .await
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// `TOTAL()` always returns a float in SQLite/libsql.
fn decimal_from_total(total: f64) -> Decimal {
    Decimal::from_str(&format!("{total:.10}"))
        .map(|d| d.normalize())
        .unwrap_or(Decimal::ZERO)
}

async fn parse_usage_row(rows: &mut libsql::Rows) -> Result<UsageSummary, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => Ok(UsageSummary {
            cost: decimal_from_total(row.get(0).unwrap_or(0.0)),
            prompt_tokens: row.get::<f64>(1).unwrap_or(0.0) as u64,
            completion_tokens: row.get::<f64>(2).unwrap_or(0.0) as u64,
            total_tokens: row.get::<f64>(3).unwrap_or(0.0) as u64,
            call_count: row.get::<i64>(4).unwrap_or(0).max(0) as u64,
        }),
        Ok(None) => Ok(UsageSummary::default()),
        Err(e) => Err(DatabaseError::Query(format!("parse_usage_row: {e}"))),
    }
}

fn row_to_turn(row: &libsql::Row) -> Result<ConversationTurn, DatabaseError> {
    let role: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("row_to_turn role: {e}")))?;
    Ok(ConversationTurn {
        chat_id: row.get(0).unwrap_or_default(),
        user_id: row.get(1).unwrap_or_default(),
        role: TurnRole::parse(&role),
        content: row.get(3).unwrap_or_default(),
        timestamp: from_unix(row.get(4).unwrap_or_default()),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Chats & users ───────────────────────────────────────────────

    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO chats (id, title, kind, username) VALUES (?1, ?2, ?3, ?4)",
                params![
                    chat.id,
                    chat.title.as_str(),
                    chat.kind.as_str(),
                    opt_text(chat.username.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_chat: {e}")))?;
        Ok(())
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO users (id, username, first_name, last_name) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id,
                    opt_text(user.username.as_deref()),
                    user.first_name.as_str(),
                    opt_text(user.last_name.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user: {e}")))?;
        Ok(())
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, DatabaseError> {
        let username = username.trim_start_matches('@');
        let mut rows = self
            .conn()
            .query(
                "SELECT id, username, first_name, last_name FROM users WHERE username = ?1 COLLATE NOCASE LIMIT 1",
                params![username],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_user_by_username: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(UserRecord {
                id: row.get(0).unwrap_or_default(),
                username: row.get(1).ok(),
                first_name: row.get(2).unwrap_or_default(),
                last_name: row.get(3).ok(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_user_by_username: {e}"))),
        }
    }

    async fn get_user_ai_info(&self, user_id: i64) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT ai_user_info FROM users WHERE id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_ai_info: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<String>(0)
                .ok()
                .filter(|info| !info.trim().is_empty())),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_ai_info: {e}"))),
        }
    }

    async fn set_user_ai_info(&self, user_id: i64, info: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users (id, ai_user_info) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET ai_user_info = excluded.ai_user_info",
                params![user_id, info],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_user_ai_info: {e}")))?;
        Ok(())
    }

    async fn has_admin_role(&self, chat_id: i64, user_id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .count(
                "has_admin_role",
                "SELECT COUNT(*) FROM users_role WHERE chat_id = ?1 AND user_id = ?2 AND role = 'admin'",
                params![chat_id, user_id],
            )
            .await?;
        Ok(count > 0)
    }

    async fn set_user_role(
        &self,
        chat_id: i64,
        user_id: i64,
        role: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users_role (user_id, chat_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, chat_id) DO UPDATE SET role = excluded.role",
                params![user_id, chat_id, role],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_user_role: {e}")))?;
        Ok(())
    }

    // ── Message log ─────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO messages (chat_id, user_id, message_id, text, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.chat_id,
                    message.user_id,
                    message.message_id,
                    message.text.as_str(),
                    message.timestamp.timestamp(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        let sql = format!(
            "SELECT m.user_id, {AUTHOR_NAME_SQL}, m.text, m.timestamp
             FROM messages m LEFT JOIN users u ON u.id = m.user_id
             WHERE m.chat_id = ?1 AND m.timestamp >= ?2
             ORDER BY m.timestamp DESC, m.id DESC
             LIMIT ?3"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![chat_id, since.timestamp(), limit as i64])
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            entries.push(ChatLogEntry {
                user_id: row.get(0).unwrap_or_default(),
                author: row.get(1).unwrap_or_else(|_| "Unknown".to_string()),
                text: row.get(2).unwrap_or_default(),
                timestamp: from_unix(row.get(3).unwrap_or_default()),
            });
        }
        Ok(entries)
    }

    async fn message_stats(
        &self,
        chat_id: i64,
        day_start: DateTime<Utc>,
    ) -> Result<MessageStats, DatabaseError> {
        let total = self
            .count(
                "message_stats total",
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                params![chat_id],
            )
            .await?;
        let last_day = self
            .count(
                "message_stats last_day",
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND timestamp >= ?2",
                params![chat_id, day_start.timestamp()],
            )
            .await?;

        let sql = format!(
            "SELECT {AUTHOR_NAME_SQL}, COUNT(*) AS c
             FROM messages m LEFT JOIN users u ON u.id = m.user_id
             WHERE m.chat_id = ?1
             GROUP BY m.user_id
             ORDER BY c DESC
             LIMIT 10"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![chat_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("message_stats top: {e}")))?;

        let mut top_users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let name: String = row.get(0).unwrap_or_else(|_| "Unknown".to_string());
            let count = row.get::<i64>(1).unwrap_or(0).max(0) as u64;
            top_users.push((name, count));
        }

        Ok(MessageStats {
            total,
            last_day,
            top_users,
        })
    }

    async fn purge_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM messages WHERE timestamp < ?1",
                params![cutoff.timestamp()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_messages_before: {e}")))?;
        debug!(removed, "Purged old messages");
        Ok(removed)
    }

    // ── Conversation context ────────────────────────────────────────

    async fn append_context_turn(&self, turn: &ConversationTurn) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO chat_context (chat_id, user_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    turn.chat_id,
                    turn.user_id,
                    turn.role.as_str(),
                    turn.content.as_str(),
                    turn.timestamp.timestamp(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_context_turn: {e}")))?;
        Ok(())
    }

    async fn read_context_window(
        &self,
        chat_id: i64,
        user_id: i64,
        window: ContextWindow,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        // SQLite treats a negative LIMIT as "no limit".
        let since = window.since.map(|t| t.timestamp()).unwrap_or(i64::MIN);
        let limit = window.max_turns.map(|n| n as i64).unwrap_or(-1);

        let mut rows = self
            .conn()
            .query(
                "SELECT chat_id, user_id, role, content, timestamp FROM chat_context
                 WHERE chat_id = ?1 AND user_id = ?2 AND timestamp >= ?3
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?4",
                params![chat_id, user_id, since, limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("read_context_window: {e}")))?;

        let mut turns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            turns.push(row_to_turn(&row)?);
        }
        Ok(turns)
    }

    async fn delete_context(&self, chat_id: i64, user_id: i64) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM chat_context WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_context: {e}")))
    }

    async fn purge_context_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM chat_context WHERE timestamp < ?1",
                params![cutoff.timestamp()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_context_before: {e}")))?;
        debug!(removed, "Purged old context turns");
        Ok(removed)
    }

    // ── Billing ─────────────────────────────────────────────────────

    async fn insert_billing_record(&self, record: &BillingRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO ai_billing (user_id, chat_id, timestamp, model, prompt_tokens, completion_tokens, total_tokens, cost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.user_id,
                    record.chat_id,
                    record.timestamp.timestamp(),
                    record.model.as_str(),
                    i64::from(record.prompt_tokens),
                    i64::from(record.completion_tokens),
                    i64::from(record.total_tokens),
                    record.cost.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_billing_record: {e}")))?;
        Ok(())
    }

    async fn billing_usage_by_chat(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<UsageSummary, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT TOTAL(CAST(cost AS REAL)), TOTAL(prompt_tokens), TOTAL(completion_tokens), TOTAL(total_tokens), COUNT(*)
                 FROM ai_billing WHERE chat_id = ?1 AND timestamp >= ?2",
                params![chat_id, since.timestamp()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("billing_usage_by_chat: {e}")))?;

        parse_usage_row(&mut rows).await
    }

    async fn billing_usage_by_user(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<UsageSummary, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT TOTAL(CAST(cost AS REAL)), TOTAL(prompt_tokens), TOTAL(completion_tokens), TOTAL(total_tokens), COUNT(*)
                 FROM ai_billing WHERE user_id = ?1 AND timestamp >= ?2",
                params![user_id, since.timestamp()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("billing_usage_by_user: {e}")))?;

        parse_usage_row(&mut rows).await
    }

    async fn billing_top_users(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserUsage>, DatabaseError> {
        let sql = format!(
            "SELECT b.user_id, {AUTHOR_NAME_SQL}, TOTAL(b.total_tokens), TOTAL(CAST(b.cost AS REAL)) AS spend
             FROM ai_billing b LEFT JOIN users u ON u.id = b.user_id
             WHERE b.chat_id = ?1 AND b.timestamp >= ?2
             GROUP BY b.user_id
             ORDER BY spend DESC
             LIMIT ?3"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![chat_id, since.timestamp(), limit as i64])
            .await
            .map_err(|e| DatabaseError::Query(format!("billing_top_users: {e}")))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            users.push(UserUsage {
                user_id: row.get(0).unwrap_or_default(),
                name: row.get(1).unwrap_or_else(|_| "Unknown".to_string()),
                total_tokens: row.get::<f64>(2).unwrap_or(0.0) as u64,
                cost: decimal_from_total(row.get(3).unwrap_or(0.0)),
            });
        }
        Ok(users)
    }

    // ── Captcha ─────────────────────────────────────────────────────

    async fn insert_captcha(&self, captcha: &NewCaptcha) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO captchas (chat_id, user_id, question, answer, sent_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                captcha.chat_id,
                captcha.user_id,
                captcha.question.as_str(),
                captcha.answer,
                captcha.sent_at.timestamp(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_captcha: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    async fn latest_unanswered_captcha(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Option<CaptchaRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, chat_id, user_id, question, answer, sent_at, answered_at, is_correct
                 FROM captchas
                 WHERE answered_at IS NULL AND id = (
                     SELECT id FROM captchas
                     WHERE chat_id = ?1 AND user_id = ?2
                     ORDER BY sent_at DESC, id DESC
                     LIMIT 1
                 )",
                params![chat_id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_unanswered_captcha: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(CaptchaRecord {
                id: row.get(0).unwrap_or_default(),
                chat_id: row.get(1).unwrap_or_default(),
                user_id: row.get(2).unwrap_or_default(),
                question: row.get(3).unwrap_or_default(),
                answer: row.get(4).unwrap_or_default(),
                sent_at: from_unix(row.get(5).unwrap_or_default()),
                answered_at: row.get::<i64>(6).ok().map(from_unix),
                is_correct: row.get::<i64>(7).unwrap_or(0) != 0,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "latest_unanswered_captcha: {e}"
            ))),
        }
    }

    async fn mark_captcha_answered(
        &self,
        id: i64,
        is_correct: bool,
        answered_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE captchas SET answered_at = ?1, is_correct = ?2 WHERE id = ?3",
                params![answered_at.timestamp(), i64::from(is_correct), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_captcha_answered: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "captcha".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn has_passed_captcha(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .count(
                "has_passed_captcha",
                "SELECT COUNT(*) FROM captchas WHERE chat_id = ?1 AND user_id = ?2 AND is_correct = 1",
                params![chat_id, user_id],
            )
            .await?;
        Ok(count > 0)
    }

    // ── Moderation ──────────────────────────────────────────────────

    async fn insert_thanks(&self, thanks: &ThanksRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO mod_thanks (chat_id, from_user_id, to_user_id, text, timestamp, message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    thanks.chat_id,
                    thanks.from_user_id,
                    thanks.to_user_id,
                    thanks.text.as_str(),
                    thanks.timestamp.timestamp(),
                    thanks.message_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_thanks: {e}")))?;
        Ok(())
    }

    async fn thanks_received(&self, chat_id: i64, user_id: i64) -> Result<u64, DatabaseError> {
        self.count(
            "thanks_received",
            "SELECT COUNT(*) FROM mod_thanks WHERE chat_id = ?1 AND to_user_id = ?2",
            params![chat_id, user_id],
        )
        .await
    }

    async fn top_thanked(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, DatabaseError> {
        let sql = format!(
            "SELECT {AUTHOR_NAME_SQL}, COUNT(*) AS c
             FROM mod_thanks t LEFT JOIN users u ON u.id = t.to_user_id
             WHERE t.chat_id = ?1
             GROUP BY t.to_user_id
             ORDER BY c DESC
             LIMIT ?2"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![chat_id, limit as i64])
            .await
            .map_err(|e| DatabaseError::Query(format!("top_thanked: {e}")))?;

        let mut result = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let name: String = row.get(0).unwrap_or_else(|_| "Unknown".to_string());
            result.push((name, row.get::<i64>(1).unwrap_or(0).max(0) as u64));
        }
        Ok(result)
    }

    async fn insert_spam_incident(&self, incident: &SpamIncident) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO mod_spam_incidents (chat_id, user_id, message_text, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    incident.chat_id,
                    incident.user_id,
                    incident.message_text.as_str(),
                    incident.reason.as_str(),
                    incident.created_at.timestamp(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_spam_incident: {e}")))?;
        Ok(())
    }
}
