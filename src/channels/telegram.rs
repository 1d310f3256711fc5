//! Telegram channel: long-polls the Bot API for updates.
//!
//! Parses raw updates into [`InboundMessage`] and implements the outbound
//! half of [`Channel`] over plain `reqwest` calls.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::channel::{
    BotIdentity, CHANNEL_ADMIN_USER_ID, Channel, ChatAction, ChatKind, ChatRef, Entity,
    EntityKind, InboundMessage, MemberStatus, MessageStream, PhotoAttachment, ReplyRef, UserRef,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram channel talking to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()
            .unwrap_or_default();
        Self { bot_token, client }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// POST a JSON body and unwrap the Bot API envelope.
    async fn call(&self, method: &str, body: Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(method, e.to_string()))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| request_failed(method, format!("decode ({status}): {e}")))?;

        if data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(request_failed(method, format!("{status}: {description}")));
        }

        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(message_id) = reply_to {
            body["reply_parameters"] = serde_json::json!({
                "message_id": message_id,
                "allow_sending_without_reply": true
            });
        }

        let markdown_err = match self.call("sendMessage", body.clone()).await {
            Ok(result) => return Ok(result.get("message_id").and_then(Value::as_i64).unwrap_or(0)),
            Err(e) => e,
        };
        tracing::warn!(
            chat_id,
            error = %markdown_err,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let result = self
            .call("sendMessage", body)
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed (markdown: {markdown_err}, plain: {e})"),
            })?;
        Ok(result.get("message_id").and_then(Value::as_i64).unwrap_or(0))
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(message) = update.get("message").and_then(parse_message) else {
                        continue;
                    };

                    if tx.send(message).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, ChannelError> {
        let mut last_id = 0;
        // Only the first chunk is threaded as a reply.
        for (i, chunk) in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH)
            .iter()
            .enumerate()
        {
            let reply = if i == 0 { reply_to } else { None };
            last_id = self.send_message_chunk(chat_id, chunk, reply).await?;
        }
        Ok(last_id)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: PhotoAttachment,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        let file_name = photo.file_name.clone();
        let part = Part::bytes(photo.bytes).file_name(photo.file_name);

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);

        if let Some(cap) = photo.caption {
            form = form.text("caption", cap);
        }
        if let Some(message_id) = reply_to {
            form = form.text("reply_to_message_id", message_id.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendPhoto failed: {err}"),
            });
        }

        tracing::info!(chat_id, file_name = %file_name, "Telegram photo sent");
        Ok(())
    }

    async fn send_chat_action(
        &self,
        chat_id: i64,
        action: ChatAction,
    ) -> Result<(), ChannelError> {
        self.call(
            "sendChatAction",
            serde_json::json!({ "chat_id": chat_id, "action": action.as_str() }),
        )
        .await
        .map(|_| ())
    }

    async fn get_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<MemberStatus, ChannelError> {
        let result = self
            .call(
                "getChatMember",
                serde_json::json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::InvalidMessage("getChatMember: no status".into()))?;
        Ok(MemberStatus::parse(status))
    }

    async fn get_administrators(&self, chat_id: i64) -> Result<Vec<UserRef>, ChannelError> {
        let result = self
            .call(
                "getChatAdministrators",
                serde_json::json!({ "chat_id": chat_id }),
            )
            .await?;
        Ok(result
            .as_array()
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| m.get("user").and_then(parse_user))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChannelError> {
        self.call(
            "deleteMessage",
            serde_json::json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
        .map(|_| ())
    }

    async fn get_me(&self) -> Result<BotIdentity, ChannelError> {
        let result = self
            .call("getMe", serde_json::json!({}))
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;
        let id = result.get("id").and_then(Value::as_i64).unwrap_or_default();
        let username = result
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(BotIdentity { id, username })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        token.expose_secret()
    )
}

fn request_failed(method: &str, reason: String) -> ChannelError {
    ChannelError::RequestFailed {
        name: "telegram".into(),
        method: method.to_string(),
        reason,
    }
}

/// Parse a Bot API `User` object.
fn parse_user(value: &Value) -> Option<UserRef> {
    let id = value.get("id").and_then(Value::as_i64)?;
    let mut first_name = value
        .get("first_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if id == CHANNEL_ADMIN_USER_ID {
        first_name = "Админ-Канала".to_string();
    }
    Some(UserRef {
        id,
        username: value
            .get("username")
            .and_then(Value::as_str)
            .map(String::from),
        first_name,
        last_name: value
            .get("last_name")
            .and_then(Value::as_str)
            .map(String::from),
        is_bot: value.get("is_bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_entities(value: Option<&Value>) -> Vec<Entity> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|e| {
            let offset = e.get("offset").and_then(Value::as_u64)? as usize;
            let length = e.get("length").and_then(Value::as_u64)? as usize;
            let kind = match e.get("type").and_then(Value::as_str) {
                Some("mention") => EntityKind::Mention,
                Some("text_mention") => match e.get("user").and_then(parse_user) {
                    Some(user) => EntityKind::TextMention(user),
                    None => EntityKind::Other,
                },
                Some("bot_command") => EntityKind::BotCommand,
                _ => EntityKind::Other,
            };
            Some(Entity {
                kind,
                offset,
                length,
            })
        })
        .collect()
}

/// Text of a message, falling back to the media caption.
fn message_text(message: &Value) -> String {
    message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parse a Bot API `Message` object into an [`InboundMessage`].
fn parse_message(message: &Value) -> Option<InboundMessage> {
    let message_id = message.get("message_id").and_then(Value::as_i64)?;
    let chat = message.get("chat")?;
    let chat = ChatRef {
        id: chat.get("id").and_then(Value::as_i64)?,
        kind: ChatKind::parse(chat.get("type").and_then(Value::as_str).unwrap_or("private")),
        title: chat.get("title").and_then(Value::as_str).map(String::from),
        username: chat.get("username").and_then(Value::as_str).map(String::from),
    };

    let date = message
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    let reply_to = message.get("reply_to_message").and_then(|r| {
        Some(ReplyRef {
            message_id: r.get("message_id").and_then(Value::as_i64)?,
            author: r.get("from").and_then(parse_user),
            text: message_text(r),
        })
    });

    let entities = parse_entities(
        message
            .get("entities")
            .or_else(|| message.get("caption_entities")),
    );

    let new_members = message
        .get("new_chat_members")
        .and_then(Value::as_array)
        .map(|users| users.iter().filter_map(parse_user).collect())
        .unwrap_or_default();

    Some(InboundMessage {
        message_id,
        chat,
        from: message.get("from").and_then(parse_user),
        text: message_text(message),
        date,
        reply_to,
        entities,
        new_members,
    })
}

/// Largest char boundary in `s` that is ≤ `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Find a good split point
        let hard_cut = match floor_char_boundary(remaining, max_len) {
            0 => remaining.chars().next().map(char::len_utf8).unwrap_or(1),
            n => n,
        };
        let chunk = &remaining[..hard_cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(hard_cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { hard_cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_channel_name() {
        let ch = TelegramChannel::new(SecretString::from("fake-token"));
        assert_eq!(ch.name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let ch = TelegramChannel::new(SecretString::from("123:ABC"));
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn parses_group_reply_with_mention() {
        let raw = serde_json::json!({
            "message_id": 77,
            "date": 1_700_000_000,
            "chat": { "id": -100, "type": "supergroup", "title": "Rustaceans" },
            "from": { "id": 5, "is_bot": false, "first_name": "Ann", "username": "ann" },
            "text": "спасибо @bob",
            "entities": [{ "type": "mention", "offset": 8, "length": 4 }],
            "reply_to_message": {
                "message_id": 70,
                "from": { "id": 6, "is_bot": false, "first_name": "Bob" },
                "text": "вот ссылка"
            }
        });

        let msg = parse_message(&raw).unwrap();
        assert_eq!(msg.message_id, 77);
        assert_eq!(msg.chat.kind, ChatKind::Supergroup);
        assert_eq!(msg.chat.title.as_deref(), Some("Rustaceans"));
        assert_eq!(msg.author_id(), 5);
        assert_eq!(msg.date.timestamp(), 1_700_000_000);
        let reply = msg.reply_to.unwrap();
        assert_eq!(reply.message_id, 70);
        assert_eq!(reply.author.unwrap().id, 6);
        assert_eq!(msg.entities.len(), 1);
        assert_eq!(msg.entities[0].text_in(&msg.text).as_deref(), Some("@bob"));
    }

    #[test]
    fn caption_is_used_when_text_is_missing() {
        let raw = serde_json::json!({
            "message_id": 1,
            "date": 1_700_000_000,
            "chat": { "id": 1, "type": "private" },
            "caption": "look at this"
        });
        let msg = parse_message(&raw).unwrap();
        assert_eq!(msg.text, "look at this");
        assert!(msg.from.is_none());
    }

    #[test]
    fn parses_new_members_and_channel_admin_name() {
        let raw = serde_json::json!({
            "message_id": 2,
            "date": 1_700_000_000,
            "chat": { "id": -5, "type": "group" },
            "from": { "id": CHANNEL_ADMIN_USER_ID, "is_bot": false, "first_name": "Group" },
            "new_chat_members": [
                { "id": 10, "is_bot": false, "first_name": "New" },
                { "id": 11, "is_bot": true, "first_name": "Helper" }
            ]
        });
        let msg = parse_message(&raw).unwrap();
        assert_eq!(msg.new_members.len(), 2);
        assert!(msg.new_members[1].is_bot);
        assert_eq!(msg.from.unwrap().first_name, "Админ-Канала");
    }

    #[test]
    fn text_mention_carries_user() {
        let entities = parse_entities(Some(&serde_json::json!([
            { "type": "text_mention", "offset": 0, "length": 3,
              "user": { "id": 9, "is_bot": false, "first_name": "Ivy" } }
        ])));
        assert!(matches!(&entities[0].kind, EntityKind::TextMention(u) if u.id == 9));
    }

    #[test]
    fn message_without_chat_is_rejected() {
        let raw = serde_json::json!({ "message_id": 3, "text": "hi" });
        assert!(parse_message(&raw).is_none());
    }

    // ── split_message ───────────────────────────────────────────────

    #[test]
    fn split_message_short() {
        let chunks = split_message("hello", 100);
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let text = "a".repeat(4096);
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let text = format!("{}\n{}", "a".repeat(50), "b".repeat(60));
        let chunks = split_message(&text, 80);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(50));
        assert_eq!(chunks[1], "b".repeat(60));
    }

    #[test]
    fn split_message_respects_multibyte_chars() {
        // Each Cyrillic letter is two bytes; a byte cut at 5 would land mid-char.
        let text = "жжжжжжжжжж";
        let chunks = split_message(text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }
}
