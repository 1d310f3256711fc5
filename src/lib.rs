//! Chat Sheriff: a group-chat moderation and conversation bot.

pub mod captcha;
pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod maintenance;
pub mod pipeline;
pub mod spam;
pub mod store;
pub mod typing;

#[cfg(test)]
mod testing;
