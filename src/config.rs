//! Configuration types.
//!
//! Everything is read from the environment once at start-up. The triage
//! pipeline gets an immutable [`TriageSettings`] derived from it, so tests
//! can build their own settings without touching process state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::BotIdentity;
use crate::error::ConfigError;
use crate::llm::costs::CostTable;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You're an AI assistant that creates concise Russian summaries of chat discussions. Identify main topics and essence. Always reply in Russian.";

pub const DEFAULT_SUMMARY_PROMPT: &str = "Generate concise Russian summary of discussion. Highlight key topics. Format authors as @username. Use only these messages:\n{messages}\nReply in Russian.";

pub const DEFAULT_JOKE_PROMPT: &str = "Using these messages, create a short funny joke in Russian, loosely related to discussion. Format as one cohesive text. Don't use usernames:\n{messages}\nReply in Russian only.";

pub const DEFAULT_TOPIC_PROMPT: &str = "Here is a recent chat discussion:\n{messages}\nSuggest one interesting question or angle that would keep this discussion going. Be brief and friendly. Reply in Russian only.";

pub const DEFAULT_DIALOGUE_PROMPT: &str = "You are Sheriff, a friendly and witty member of a Telegram group chat. Answer briefly and to the point. Always reply in Russian.";

/// Process-wide bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: SecretString,
    pub db_path: PathBuf,
    pub ai: AiConfig,
    pub retention: RetentionConfig,
    pub allowed_chats: Vec<i64>,
    pub admin_users: Vec<i64>,
    pub bot_aliases: Vec<String>,
    pub stale_after: Duration,
    pub summary_limit: usize,
    pub captcha_enabled: bool,
    pub prompts: PromptConfig,
    /// Directory for daily-rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Completion and image endpoint settings.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub image_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub costs: CostTable,
}

/// Retention horizons and the dialogue window.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub history_days: i64,
    pub context_retention_days: i64,
    pub context_max_turns: usize,
    pub context_max_age_hours: i64,
}

/// Prompt templates. `{messages}` is replaced with the formatted chat log.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub system: String,
    pub summary: String,
    pub joke: String,
    pub topic: String,
    pub dialogue: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            summary: DEFAULT_SUMMARY_PROMPT.to_string(),
            joke: DEFAULT_JOKE_PROMPT.to_string(),
            topic: DEFAULT_TOPIC_PROMPT.to_string(),
            dialogue: DEFAULT_DIALOGUE_PROMPT.to_string(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_days: 1,
            context_retention_days: 7,
            context_max_turns: 20,
            context_max_age_hours: 24,
        }
    }
}

impl BotConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let telegram_token = std::env::var("TELEGRAM_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_TOKEN".into()))?;

        let costs = match std::env::var("AI_COST_TABLE") {
            Ok(raw) => CostTable::parse(&raw).map_err(|message| ConfigError::InvalidValue {
                key: "AI_COST_TABLE".into(),
                message,
            })?,
            Err(_) => CostTable::default(),
        };

        let ai = AiConfig {
            url: env_or("AI_URL", "http://localhost:1234/v1/chat/completions"),
            model: env_or("AI_MODEL", "gpt-4o-mini"),
            api_key: std::env::var("AI_API_KEY").ok().map(SecretString::from),
            image_url: env_or("AI_IMAGE_URL", "https://image.pollinations.ai/prompt/"),
            temperature: parse_env("AI_TEMPERATURE", 0.7)?,
            max_tokens: parse_env("AI_MAX_TOKENS", 16_000)?,
            timeout: Duration::from_secs(parse_env("AI_TIMEOUT_SECS", 300)?),
            retry_attempts: parse_env("AI_RETRY_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_secs(parse_env("AI_RETRY_BASE_SECS", 5)?),
            costs,
        };

        let defaults = RetentionConfig::default();
        let retention = RetentionConfig {
            history_days: parse_env("HISTORY_DAYS", defaults.history_days)?,
            context_retention_days: parse_env(
                "CONTEXT_RETENTION_DAYS",
                defaults.context_retention_days,
            )?,
            context_max_turns: parse_env("CONTEXT_MAX_TURNS", defaults.context_max_turns)?,
            context_max_age_hours: parse_env(
                "CONTEXT_MAX_AGE_HOURS",
                defaults.context_max_age_hours,
            )?,
        };

        let prompts = PromptConfig {
            system: env_or("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            summary: env_or("SUMMARY_PROMPT", DEFAULT_SUMMARY_PROMPT),
            joke: env_or("JOKE_PROMPT", DEFAULT_JOKE_PROMPT),
            topic: env_or("TOPIC_PROMPT", DEFAULT_TOPIC_PROMPT),
            dialogue: env_or("DIALOGUE_PROMPT", DEFAULT_DIALOGUE_PROMPT),
        };

        Ok(Self {
            telegram_token: SecretString::from(telegram_token),
            db_path: PathBuf::from(env_or("DB_PATH", "./data/sheriff.db")),
            ai,
            retention,
            allowed_chats: parse_id_list("ALLOWED_CHATS", &env_or("ALLOWED_CHATS", ""))?,
            admin_users: parse_id_list("ADMIN_USERS", &env_or("ADMIN_USERS", ""))?,
            bot_aliases: parse_aliases(&env_or("BOT_ALIASES", "sheriff,шериф,шерифф")),
            stale_after: Duration::from_secs(parse_env("STALE_AFTER_SECS", 300)?),
            summary_limit: parse_env("SUMMARY_LIMIT", 100)?,
            captcha_enabled: parse_env("CAPTCHA_ENABLED", true)?,
            prompts,
            log_dir: std::env::var("SHERIFF_LOG_DIR").ok().map(PathBuf::from),
        })
    }

    /// Build the pipeline settings once the bot's own identity is known.
    pub fn triage_settings(&self, bot: BotIdentity) -> TriageSettings {
        TriageSettings {
            bot,
            allowed_chats: self.allowed_chats.clone(),
            admin_users: self.admin_users.clone(),
            bot_aliases: self.bot_aliases.clone(),
            stale_after: self.stale_after,
            summary_limit: self.summary_limit,
            captcha_enabled: self.captcha_enabled,
            context_max_turns: self.retention.context_max_turns,
            context_max_age_hours: self.retention.context_max_age_hours,
            prompts: self.prompts.clone(),
        }
    }
}

/// Immutable settings injected into the triage pipeline.
#[derive(Debug, Clone)]
pub struct TriageSettings {
    pub bot: BotIdentity,
    /// Empty means every chat is allowed.
    pub allowed_chats: Vec<i64>,
    pub admin_users: Vec<i64>,
    pub bot_aliases: Vec<String>,
    pub stale_after: Duration,
    pub summary_limit: usize,
    pub captcha_enabled: bool,
    pub context_max_turns: usize,
    pub context_max_age_hours: i64,
    pub prompts: PromptConfig,
}

impl TriageSettings {
    /// Defaults suitable for tests and local runs.
    pub fn new(bot: BotIdentity) -> Self {
        let retention = RetentionConfig::default();
        Self {
            bot,
            allowed_chats: Vec::new(),
            admin_users: Vec::new(),
            bot_aliases: parse_aliases("sheriff,шериф,шерифф"),
            stale_after: Duration::from_secs(300),
            summary_limit: 100,
            captcha_enabled: true,
            context_max_turns: retention.context_max_turns,
            context_max_age_hours: retention.context_max_age_hours,
            prompts: PromptConfig::default(),
        }
    }

    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn parse_id_list(key: &str, raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{s}: {e}"),
            })
        })
        .collect()
}

fn parse_aliases(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> BotIdentity {
        BotIdentity {
            id: 1,
            username: "sheriff_bot".into(),
        }
    }

    #[test]
    fn empty_allow_list_allows_every_chat() {
        let settings = TriageSettings::new(bot());
        assert!(settings.is_chat_allowed(-100));
        assert!(settings.is_chat_allowed(42));
    }

    #[test]
    fn allow_list_restricts_chats() {
        let mut settings = TriageSettings::new(bot());
        settings.allowed_chats = vec![-100];
        assert!(settings.is_chat_allowed(-100));
        assert!(!settings.is_chat_allowed(-200));
    }

    #[test]
    fn id_list_parsing_skips_blanks() {
        let ids = parse_id_list("ALLOWED_CHATS", " -100, 42 ,,").unwrap();
        assert_eq!(ids, vec![-100, 42]);
    }

    #[test]
    fn id_list_rejects_garbage() {
        let err = parse_id_list("ADMIN_USERS", "12,abc").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ADMIN_USERS"));
    }

    #[test]
    fn aliases_are_lowercased() {
        assert_eq!(
            parse_aliases("Sheriff, ШЕРИФ"),
            vec!["sheriff".to_string(), "шериф".to_string()]
        );
    }
}
