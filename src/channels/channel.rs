//! Transport-facing types and the `Channel` trait.
//!
//! Everything the triage pipeline needs from the chat platform arrives
//! already parsed: message age, reply linkage, and mention spans.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::ChannelError;

/// Telegram reports anonymous channel admins under this fixed user id.
pub const CHANNEL_ADMIN_USER_ID: i64 = 136_817_688;

/// Stream of inbound messages from a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Who the bot is on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
}

/// Kind of chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "group" => Self::Group,
            "supergroup" => Self::Supergroup,
            "channel" => Self::Channel,
            _ => Self::Private,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
        }
    }

    /// Group contexts are the only ones whose messages are logged.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }
}

#[derive(Debug, Clone)]
pub struct ChatRef {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRef {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
}

impl UserRef {
    /// `@username` when available, otherwise the full name.
    pub fn display_name(&self) -> String {
        if let Some(u) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("@{u}");
        }
        let full = match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {last}", self.first_name),
            _ => self.first_name.clone(),
        };
        full.trim().to_string()
    }
}

/// The message a reply points at.
#[derive(Debug, Clone)]
pub struct ReplyRef {
    pub message_id: i64,
    pub author: Option<UserRef>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    /// `@username` typed in the text.
    Mention,
    /// A mention of a user without a username; carries the user.
    TextMention(UserRef),
    BotCommand,
    Other,
}

/// A formatting entity. Offsets are in UTF-16 code units, as Telegram sends them.
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl Entity {
    /// The slice of `text` this entity covers.
    pub fn text_in(&self, text: &str) -> Option<String> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let end = self.offset.checked_add(self.length)?;
        if end > units.len() {
            return None;
        }
        String::from_utf16(&units[self.offset..end]).ok()
    }
}

/// A parsed inbound update.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: i64,
    pub chat: ChatRef,
    pub from: Option<UserRef>,
    /// Message text, or the caption when the message is media.
    pub text: String,
    pub date: DateTime<Utc>,
    pub reply_to: Option<ReplyRef>,
    pub entities: Vec<Entity>,
    pub new_members: Vec<UserRef>,
}

impl InboundMessage {
    pub fn author_id(&self) -> i64 {
        self.from.as_ref().map(|u| u.id).unwrap_or_default()
    }

    pub fn author_name(&self) -> String {
        self.from
            .as_ref()
            .map(UserRef::display_name)
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Membership status as reported by `getChatMember`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "creator" => Self::Creator,
            "administrator" => Self::Administrator,
            "member" => Self::Member,
            "restricted" => Self::Restricted,
            "kicked" => Self::Kicked,
            _ => Self::Left,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Creator | Self::Administrator)
    }

    /// Whether a bot with this status receives the chat's messages.
    pub fn can_read(&self) -> bool {
        matches!(self, Self::Creator | Self::Administrator | Self::Member)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadPhoto,
}

impl ChatAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typing => "typing",
            Self::UploadPhoto => "upload_photo",
        }
    }
}

/// An in-memory photo ready to upload.
#[derive(Debug, Clone)]
pub struct PhotoAttachment {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub caption: Option<String>,
}

/// A chat platform the bot talks through.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start receiving updates.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send text, optionally as a reply. Returns the id of the last sent message.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, ChannelError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: PhotoAttachment,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError>;

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction)
    -> Result<(), ChannelError>;

    async fn get_chat_member(&self, chat_id: i64, user_id: i64)
    -> Result<MemberStatus, ChannelError>;

    async fn get_administrators(&self, chat_id: i64) -> Result<Vec<UserRef>, ChannelError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChannelError>;

    async fn get_me(&self) -> Result<BotIdentity, ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.get_me().await.map(|_| ())
    }
}
