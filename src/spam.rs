//! Rule-based spam classifier.
//!
//! Three ordered batteries, first match wins:
//! 1. labelled regex patterns over the raw text
//! 2. suspicious word combinations (substring match on the lowercased text)
//! 3. URL denylist: URLs whose text contains a shortener or scam fragment
//!
//! Tables are `Vec`s, not maps, so evaluation order and therefore the
//! reported reason never changes between runs.

use regex::Regex;
use tracing::debug;

/// A labelled pattern.
#[derive(Debug, Clone)]
pub struct SpamPattern {
    pub regex: Regex,
    /// Human-readable category, used as the verdict reason.
    pub label: String,
}

/// Outcome of a classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamVerdict {
    pub is_spam: bool,
    /// Empty when the text is clean.
    pub reason: String,
}

impl SpamVerdict {
    fn clean() -> Self {
        Self {
            is_spam: false,
            reason: String::new(),
        }
    }

    fn spam(reason: String) -> Self {
        Self {
            is_spam: true,
            reason,
        }
    }
}

/// Pure, deterministic spam classifier.
pub struct SpamClassifier {
    patterns: Vec<SpamPattern>,
    combinations: Vec<&'static str>,
    url_regex: Regex,
    suspicious_domains: Vec<(&'static str, &'static str)>,
}

impl Default for SpamClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl SpamClassifier {
    /// Classifier with the built-in rule tables.
    pub fn default_rules() -> Self {
        let table: &[(&str, &str)] = &[
            (
                r"(http|https|ftp|www\.|t\.me|telegram\.me|\+\d{7,}|\d{10,})",
                "ссылки и контакты",
            ),
            (
                r"(?i)(крипто|биткоин|эфириум|блокчейн|nft|инвест|траст|forex|форекс|трейд)",
                "финансовый спам",
            ),
            (
                r"(?i)(заработок|доход|прибыль|пассивный доход|халява|богатство)",
                "заработок и доход",
            ),
            (
                r"(?i)(брокер|трейдинг|дивидент|криптовалют|коин|токен)",
                "трейдинг и инвестиции",
            ),
            (
                r"(?i)(бесплатно|акция|скидка|распродажа|промокод|купон|выиграй|приз|розыгрыш)",
                "рекламные предложения",
            ),
            (
                r"(?i)(ограниченное время|только сегодня|успей|последний шанс|уникальное предложение)",
                "ограниченные предложения",
            ),
            (
                r"(?i)(закажи|купи|продам|покупай|продайте|покупка|продажа|магазин|интернет-магазин)",
                "торговые предложения",
            ),
            (
                r"(?i)(скам|мошенник|обман|развод|лохотрон|надувательство|фишинг)",
                "прямые упоминания скама",
            ),
            (
                r"(?i)(гарант|гарантия|без риска|стопроцентно|проверено)",
                "сомнительные гарантии",
            ),
            (
                r"(?i)(порно|xxx|секс|интим|знакомств|встреч|девушк[иа]|парн[ие]|love|casino|казино|ставк[иа])",
                "запрещенный контент",
            ),
            (r"\p{Lu}{5,}", "множественные заглавные буквы"),
            (r"\d{10,}", "длинные числовые последовательности"),
            (r"\S{20,}", "очень длинные слова без пробелов"),
        ];

        let patterns = table
            .iter()
            .map(|(pattern, label)| SpamPattern {
                regex: Regex::new(pattern).unwrap(),
                label: (*label).to_string(),
            })
            .collect();

        Self {
            patterns,
            combinations: vec![
                "быстро деньги",
                "легкий заработок",
                "работа дома",
                "удаленная работа",
                "заработок интернет",
                "инвестиции гарантия",
                "крипто доход",
                "бесплатный подарок",
                "выиграй iphone",
                "акция только сегодня",
            ],
            url_regex: Regex::new(r"(http|https|ftp|www\.)\S+").unwrap(),
            suspicious_domains: vec![
                ("bit.ly", "укороченная ссылка"),
                ("goo.gl", "укороченная ссылка"),
                ("tinyurl", "укороченная ссылка"),
                ("shorte.st", "укороченная ссылка"),
                ("adf.ly", "рекламная ссылка"),
                ("profit", "финансовый домен"),
                ("earn", "заработок"),
                ("money", "деньги"),
                ("crypto", "криптовалюты"),
                ("investment", "инвестиции"),
                ("casino", "азартные игры"),
                ("gambling", "гемблинг"),
            ],
        }
    }

    /// Classify `text`. Empty text is always clean.
    pub fn classify(&self, text: &str) -> SpamVerdict {
        if text.trim().is_empty() {
            return SpamVerdict::clean();
        }

        if let Some(pattern) = self.patterns.iter().find(|p| p.regex.is_match(text)) {
            debug!(label = %pattern.label, "Spam pattern matched");
            return SpamVerdict::spam(pattern.label.clone());
        }

        let lower = text.to_lowercase();
        if let Some(combo) = self.combinations.iter().find(|c| lower.contains(*c)) {
            debug!(combo, "Suspicious word combination");
            return SpamVerdict::spam(format!("подозрительная комбинация слов: {combo}"));
        }

        for url in self.url_regex.find_iter(text) {
            let url = url.as_str().to_lowercase();
            if let Some((domain, why)) = self
                .suspicious_domains
                .iter()
                .find(|(domain, _)| url.contains(domain))
            {
                debug!(url = %url, domain, "Suspicious URL");
                return SpamVerdict::spam(format!("подозрительная ссылка ({domain}: {why})"));
            }
        }

        SpamVerdict::clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SpamClassifier {
        SpamClassifier::default_rules()
    }

    #[test]
    fn empty_text_is_clean() {
        let c = classifier();
        assert_eq!(c.classify(""), SpamVerdict::clean());
        assert!(!c.classify("   ").is_spam);
    }

    #[test]
    fn ordinary_chat_is_clean() {
        let c = classifier();
        for text in ["спасибо", "Привет, как дела?", "завтра в 10 созвон", "ok"] {
            let verdict = c.classify(text);
            assert!(!verdict.is_spam, "{text:?} flagged as {}", verdict.reason);
            assert!(verdict.reason.is_empty());
        }
    }

    #[test]
    fn shortener_with_financial_keyword_is_spam() {
        let verdict = classifier().classify("Лучшие инвестиции тут bit.ly/abc");
        assert!(verdict.is_spam);
        assert!(!verdict.reason.is_empty());
    }

    #[test]
    fn first_matching_pattern_provides_reason() {
        // Both the link and the financial pattern match; links come first.
        let verdict = classifier().classify("https://x.io крипто");
        assert_eq!(verdict.reason, "ссылки и контакты");
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let verdict = classifier().classify("Пассивный ДОход каждый день");
        assert!(verdict.is_spam);
    }

    #[test]
    fn uppercase_run_is_spam() {
        let verdict = classifier().classify("смотри СРОЧНО сюда");
        assert_eq!(verdict.reason, "множественные заглавные буквы");
    }

    #[test]
    fn long_digit_run_is_contact_marker() {
        let verdict = classifier().classify("звони 89991234567");
        assert_eq!(verdict.reason, "ссылки и контакты");
    }

    #[test]
    fn word_combination_is_spam() {
        let mut c = classifier();
        // Isolate the combination battery.
        c.patterns.clear();
        let verdict = c.classify("Удаленная работа для всех");
        assert!(verdict.is_spam);
        assert!(verdict.reason.contains("удаленная работа"));
    }

    #[test]
    fn url_denylist_is_checked_after_patterns() {
        let mut c = classifier();
        c.patterns.clear();
        let verdict = c.classify("глянь www.Bit.ly/x");
        assert!(verdict.is_spam);
        assert!(verdict.reason.contains("bit.ly"));
        assert!(!c.classify("глянь www.rust-lang.org").is_spam);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let text = "КУПИ крипто http://profit.example скидка";
        let first = c.classify(text);
        for _ in 0..50 {
            assert_eq!(c.classify(text), first);
        }
        assert_eq!(SpamClassifier::default_rules().classify(text), first);
    }
}
