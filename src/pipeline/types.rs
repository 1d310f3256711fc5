//! Shared types for the triage pipeline.

use crate::pipeline::address::AddressIntent;

// ── Outcome ─────────────────────────────────────────────────────────

/// Why a message got no live reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Older than the staleness threshold.
    Stale,
    ChatNotAllowed,
    /// The bot is not a reading member of the chat.
    CannotRead,
    /// Nothing to act on: no text, no author, or a service message.
    Empty,
    /// A command addressed to a different bot.
    OtherBot,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::ChatNotAllowed => "chat_not_allowed",
            Self::CannotRead => "cannot_read",
            Self::Empty => "empty",
            Self::OtherBot => "other_bot",
        }
    }
}

/// Result of answering an active captcha challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaOutcome {
    Passed,
    /// Wrong answer; a fresh challenge was issued.
    Failed,
    /// Too late; a fresh challenge was issued.
    Expired,
}

/// The one terminal decision the pipeline made for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageOutcome {
    /// No reaction. Stale group messages may still have been persisted.
    Skipped(SkipReason),
    /// A command or address was refused with an explanation.
    Refused(SkipReason),
    /// New members joined; this many challenges were issued.
    Joined { challenged: usize },
    Spam { reason: String },
    Captcha(CaptchaOutcome),
    Thanked { to_user_id: i64, tally: u64 },
    Command(String),
    Addressed(AddressIntent),
    /// Continuation of a reply chain with the bot.
    Dialogue,
    Persisted,
}

impl TriageOutcome {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Refused(_) => "refused",
            Self::Joined { .. } => "joined",
            Self::Spam { .. } => "spam",
            Self::Captcha(_) => "captcha",
            Self::Thanked { .. } => "thanked",
            Self::Command(_) => "command",
            Self::Addressed(_) => "addressed",
            Self::Dialogue => "dialogue",
            Self::Persisted => "persisted",
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// A known command, with aliases folded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Ping,
    Summary,
    Stats,
    AiStats,
    Joke,
    Topic,
    Clear,
    Say,
    Image,
    Unknown(String),
}

impl Command {
    pub fn from_name(name: &str) -> Self {
        match name {
            "start" => Self::Start,
            "help" => Self::Help,
            "ping" | "пинг" => Self::Ping,
            "summary" | "саммари" => Self::Summary,
            "stat" | "stats" => Self::Stats,
            "aistat" | "aistats" => Self::AiStats,
            "anekdot" | "анекдот" => Self::Joke,
            "tema" | "topic" => Self::Topic,
            "clear" | "забудь" => Self::Clear,
            "say" | "сказать" => Self::Say,
            "img" => Self::Image,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Ping => "ping",
            Self::Summary => "summary",
            Self::Stats => "stats",
            Self::AiStats => "aistats",
            Self::Joke => "anekdot",
            Self::Topic => "tema",
            Self::Clear => "clear",
            Self::Say => "say",
            Self::Image => "img",
            Self::Unknown(name) => name,
        }
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(self, Self::AiStats | Self::Say | Self::Image)
    }
}

/// `/name@bot args` split into parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub args: String,
    /// `@bot` suffix, if any.
    pub target: Option<String>,
}

impl ParsedCommand {
    /// Parse a leading `/command`. Returns `None` for ordinary text.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, bot)) => (name, Some(bot.to_string())),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            command: Command::from_name(&name.to_lowercase()),
            args: args.to_string(),
            target,
        })
    }

    /// False when the command names a different bot.
    pub fn is_for(&self, bot_username: &str) -> bool {
        self.target
            .as_deref()
            .is_none_or(|t| t.eq_ignore_ascii_case(bot_username))
    }
}
