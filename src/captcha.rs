//! Arithmetic captcha for new chat members.
//!
//! Per (chat, user): `NoChallenge → Issued → {Correct, Incorrect, Expired}`.
//! Only the newest row for the pair can be active, so issuing again
//! supersedes any earlier unanswered challenge. Issue and verify for the
//! same pair are serialized through a per-key async lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::error::CaptchaError;
use crate::store::{CaptchaRecord, Database, NewCaptcha};

/// How long a challenge stays answerable.
pub const CAPTCHA_TTL_MINUTES: i64 = 5;

/// A freshly issued challenge.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub id: i64,
    /// Text to show the user.
    pub prompt: String,
    pub issued_at: DateTime<Utc>,
}

/// Generate a two-operand question and its answer.
///
/// Subtraction keeps the right operand no larger than the left, so the
/// answer is never negative.
pub fn generate_question<R: Rng + ?Sized>(rng: &mut R) -> (String, i64) {
    if rng.gen_bool(0.5) {
        let a = rng.gen_range(1..=50);
        let b = rng.gen_range(1..=50);
        (format!("{a} + {b}"), a + b)
    } else {
        let a = rng.gen_range(20..70);
        let b = rng.gen_range(1..=a);
        (format!("{a} - {b}"), a - b)
    }
}

/// Parse a user's answer. Anything non-numeric is simply wrong.
fn parse_answer(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Async locks keyed by (chat, user).
#[derive(Default)]
struct PairLocks {
    locks: Mutex<HashMap<(i64, i64), Arc<tokio::sync::Mutex<()>>>>,
}

impl PairLocks {
    fn get(&self, key: (i64, i64)) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop entries nobody is holding.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }
}

/// Issues and verifies captcha challenges.
pub struct CaptchaEngine {
    db: Arc<dyn Database>,
    ttl: Duration,
    locks: PairLocks,
}

impl CaptchaEngine {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            ttl: Duration::minutes(CAPTCHA_TTL_MINUTES),
            locks: PairLocks::default(),
        }
    }

    /// Issue a new challenge for the pair.
    pub async fn issue(&self, chat_id: i64, user_id: i64) -> Result<IssuedChallenge, CaptchaError> {
        self.issue_at(chat_id, user_id, Utc::now()).await
    }

    pub async fn issue_at(
        &self,
        chat_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, CaptchaError> {
        let (question, answer) = generate_question(&mut rand::thread_rng());

        let lock = self.locks.get((chat_id, user_id));
        let _guard = lock.lock().await;

        let id = self
            .db
            .insert_captcha(&NewCaptcha {
                chat_id,
                user_id,
                question: question.clone(),
                answer,
                sent_at: now,
            })
            .await?;

        info!(chat_id, user_id, id, "Captcha issued");
        Ok(IssuedChallenge {
            id,
            prompt: format!("Сколько будет: {question} = ?"),
            issued_at: now,
        })
    }

    /// Check an answer against the active challenge.
    ///
    /// Returns the verdict for answers inside the window. A challenge past
    /// its window is reported as [`CaptchaError::Expired`] whatever the
    /// answer, and its row is left untouched.
    pub async fn verify(
        &self,
        chat_id: i64,
        user_id: i64,
        raw_answer: &str,
    ) -> Result<bool, CaptchaError> {
        self.verify_at(chat_id, user_id, raw_answer, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        chat_id: i64,
        user_id: i64,
        raw_answer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CaptchaError> {
        let lock = self.locks.get((chat_id, user_id));
        let _guard = lock.lock().await;

        let challenge = self
            .db
            .latest_unanswered_captcha(chat_id, user_id)
            .await?
            .ok_or(CaptchaError::NotFound)?;

        if self.is_expired(&challenge, now) {
            debug!(chat_id, user_id, id = challenge.id, "Captcha answer arrived late");
            return Err(CaptchaError::Expired {
                issued_at: challenge.sent_at,
            });
        }

        let correct = parse_answer(raw_answer) == Some(challenge.answer);
        self.db
            .mark_captcha_answered(challenge.id, correct, now)
            .await?;

        info!(chat_id, user_id, id = challenge.id, correct, "Captcha answered");
        Ok(correct)
    }

    /// The pair's active challenge, if any. Expired ones are still returned.
    pub async fn active(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Option<CaptchaRecord>, CaptchaError> {
        Ok(self.db.latest_unanswered_captcha(chat_id, user_id).await?)
    }

    /// True once the user has ever answered correctly in this chat.
    pub async fn has_passed(&self, chat_id: i64, user_id: i64) -> Result<bool, CaptchaError> {
        Ok(self.db.has_passed_captcha(chat_id, user_id).await?)
    }

    fn is_expired(&self, challenge: &CaptchaRecord, now: DateTime<Utc>) -> bool {
        now - challenge.sent_at > self.ttl
    }
}
