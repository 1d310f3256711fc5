//! Message triage pipeline.
//!
//! Every inbound update flows through [`MessageTriage::process`], which
//! makes exactly one terminal decision: ignore, refuse, moderate, answer
//! a captcha, record thanks, run a command, talk, or log the message.

mod commands;

pub mod address;
pub mod gratitude;
pub mod prompts;
pub mod triage;
pub mod types;

pub use address::AddressIntent;
pub use triage::MessageTriage;
pub use types::{CaptchaOutcome, Command, ParsedCommand, SkipReason, TriageOutcome};
