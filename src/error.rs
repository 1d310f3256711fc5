//! Error types for the sheriff bot.

use chrono::{DateTime, Utc};

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Captcha error: {0}")]
    Captcha(#[from] CaptchaError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Request {method} on channel {name} failed: {reason}")]
    RequestFailed {
        name: String,
        method: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Completion and image endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned status {status}: {body}")]
    BadStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} returned no choices")]
    EmptyResponse { provider: String },

    #[error("Giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LlmError> },

    #[error("Image processing failed: {0}")]
    Image(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Captcha challenge errors, distinct from a wrong-answer verdict.
#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("No active captcha for this user")]
    NotFound,

    #[error("Captcha issued at {issued_at} has expired")]
    Expired { issued_at: DateTime<Utc> },

    #[error("Captcha storage failed: {0}")]
    Database(#[from] DatabaseError),
}

/// Conversation context errors.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Context store is not initialized")]
    NotInitialized,

    #[error("Context storage failed: {0}")]
    Database(#[from] DatabaseError),
}

/// Triage pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Channel send failed: {0}")]
    ChannelSend(#[from] ChannelError),

    #[error("Storage failed: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Context failed: {0}")]
    Context(#[from] ContextError),

    #[error("Captcha failed: {0}")]
    Captcha(#[from] CaptchaError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
