//! Prompt assembly and reply formatting helpers.

use std::fmt::Write;

use chrono::Duration;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::store::ChatLogEntry;

/// Placeholder replaced with the formatted chat log.
pub const MESSAGES_PLACEHOLDER: &str = "{messages}";

const SUMMARY_TITLES: &[&str] = &[
    "📝 *Сводка обсуждений*",
    "🔍📌 *Итоги дискуссии*\n────────────",
    "❓ *Что обсуждали?*",
    "📰 *Последние обсуждения*",
    "📌 *Кратко:*",
    "💡 *Мысли и идеи*",
    "🤔 *Рефлексия дискуссии*",
    "🎤 *Что тут наговорили?*",
    "⚙️ *Технические итоги*",
];

const UNKNOWN_COMMAND_REPLIES: &[&str] = &[
    "Такое не знаю.",
    "Извините, но эта команда мне не знакома.",
    "Не могу понять, что вы от меня хотите.",
    "Хм, не могу найти такую команду в своем меню.",
    "К сожалению, эта функция находится в разработке.",
];

/// One line per entry: `[HH:MM] author: text`. Entries must be oldest first.
pub fn format_log(entries: &[ChatLogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "[{}] {}: {}",
            entry.timestamp.format("%H:%M"),
            entry.author,
            entry.text
        );
    }
    out
}

/// Substitute the chat log into a template. Templates without the
/// placeholder get the log appended.
pub fn fill_template(template: &str, messages: &str) -> String {
    if template.contains(MESSAGES_PLACEHOLDER) {
        template.replace(MESSAGES_PLACEHOLDER, messages)
    } else {
        format!("{template}\n{messages}")
    }
}

pub fn random_summary_title<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut titles: Vec<String> = SUMMARY_TITLES.iter().map(|t| t.to_string()).collect();
    titles.push(format!(
        "⏱ *Обсуждение на {}*",
        chrono::Utc::now().format("%H:%M")
    ));
    titles
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| SUMMARY_TITLES[0].to_string())
}

pub fn random_unknown_command_reply<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    UNKNOWN_COMMAND_REPLIES
        .choose(rng)
        .copied()
        .unwrap_or(UNKNOWN_COMMAND_REPLIES[0])
}

/// Human-readable latency.
pub fn format_duration(d: Duration) -> String {
    let ms = d.num_milliseconds().max(0);
    if ms < 1000 {
        format!("{ms} ms")
    } else if ms < 60_000 {
        format!("{:.1} сек", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{} мин {} сек", secs / 60, secs % 60)
    }
}

pub fn help_text(bot_username: &str) -> String {
    format!(
        "Доступные команды:
/help - показать это сообщение
/summary [N] - получить сводку обсуждений (N - количество сообщений)
/anekdot - придумать анекдот по темам обсуждения
/tema - продолжить обсуждение темы
/stats - показать статистику сообщений и благодарностей
/aistats - показать статистику использования AI (только для администраторов)
/clear или /забудь - очистить контекст общения
/ping или /пинг - проверить работоспособность бота

Вы также можете обратиться ко мне напрямую:
- Начиная сообщение с \"Sheriff\", \"Шериф\" или \"Шерифф\"
- Или упомянув меня через @{bot_username}

Примеры:
- /summary 50 - получить сводку последних 50 сообщений
- /anekdot - получить анекдот
- /stats - посмотреть статистику чата"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn entry(author: &str, text: &str, h: u32, m: u32) -> ChatLogEntry {
        ChatLogEntry {
            user_id: 1,
            author: author.into(),
            text: text.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap(),
        }
    }

    #[test]
    fn log_lines_are_timestamped() {
        let log = format_log(&[entry("@anna", "привет", 9, 5), entry("Bob", "hi", 14, 30)]);
        assert_eq!(log, "[09:05] @anna: привет\n[14:30] Bob: hi\n");
    }

    #[test]
    fn template_placeholder_is_replaced() {
        assert_eq!(fill_template("Summarize:\n{messages}\nDone", "a\n"), "Summarize:\na\n\nDone");
        assert_eq!(fill_template("No slot", "a"), "No slot\na");
    }

    #[test]
    fn durations_pick_a_unit() {
        assert_eq!(format_duration(Duration::milliseconds(250)), "250 ms");
        assert_eq!(format_duration(Duration::milliseconds(2500)), "2.5 сек");
        assert_eq!(format_duration(Duration::seconds(125)), "2 мин 5 сек");
    }

    #[test]
    fn random_picks_come_from_the_lists() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert!(UNKNOWN_COMMAND_REPLIES.contains(&random_unknown_command_reply(&mut rng)));
            assert!(!random_summary_title(&mut rng).is_empty());
        }
    }
}
