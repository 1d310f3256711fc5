//! Direct address detection: "Шериф, ..." or "@sheriff_bot ...".

use crate::channels::{BotIdentity, EntityKind, InboundMessage};

/// What a direct address asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressIntent {
    Forget,
    Summary,
    Help,
    /// Anything else is a dialogue turn with this text.
    Dialogue(String),
}

impl AddressIntent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Forget => "forget",
            Self::Summary => "summary",
            Self::Help => "help",
            Self::Dialogue(_) => "dialogue",
        }
    }
}

/// If the message addresses the bot, return the text with the address removed.
pub fn strip_address(
    message: &InboundMessage,
    bot: &BotIdentity,
    aliases: &[String],
) -> Option<String> {
    let text = message.text.trim_start();

    for alias in aliases {
        if let Some(rest) = strip_prefix_ci(text, alias) {
            if !rest.chars().next().is_some_and(char::is_alphanumeric) {
                return Some(trim_address_punctuation(rest).to_string());
            }
        }
    }

    let handle = format!("@{}", bot.username);
    for entity in &message.entities {
        match &entity.kind {
            EntityKind::Mention => {
                let Some(mention) = entity.text_in(&message.text) else {
                    continue;
                };
                if mention.eq_ignore_ascii_case(&handle) {
                    let rest = message.text.replacen(&mention, "", 1);
                    return Some(trim_address_punctuation(&rest).to_string());
                }
            }
            EntityKind::TextMention(user) if user.id == bot.id => {
                if let Some(mention) = entity.text_in(&message.text) {
                    let rest = message.text.replacen(&mention, "", 1);
                    return Some(trim_address_punctuation(&rest).to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Map the stripped text to an intent by its first word.
pub fn classify_intent(stripped: &str) -> AddressIntent {
    let first = stripped
        .split_whitespace()
        .next()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .unwrap_or_default();

    match first.as_str() {
        "" => AddressIntent::Help,
        "забудь" | "forget" => AddressIntent::Forget,
        "саммари" | "summary" | "сводка" => AddressIntent::Summary,
        "помощь" | "help" => AddressIntent::Help,
        _ => AddressIntent::Dialogue(stripped.to_string()),
    }
}

/// Case-insensitive `strip_prefix` that works on chars, not bytes.
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    Some(chars.as_str())
}

fn trim_address_punctuation(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | ',' | '!' | '.'))
        .trim_end()
}
