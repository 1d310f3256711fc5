//! Message triage: one terminal decision per inbound message.
//!
//! Order of checks:
//! 1. Staleness (old messages are logged, never answered)
//! 2. Chat allow-list
//! 3. Bot read permission
//! 4. Spam classifier, then the captcha gate for pending challenges
//! 5. Gratitude
//! 6. Commands
//! 7. Direct address
//! 8. Reply-chain dialogue
//! 9. Persist to the chat log

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::captcha::{CAPTCHA_TTL_MINUTES, CaptchaEngine};
use crate::channels::{Channel, ChatKind, InboundMessage, MessageStream, UserRef};
use crate::config::TriageSettings;
use crate::context::ContextStore;
use crate::error::{CaptchaError, PipelineError};
use crate::llm::{AiExecutor, CallIdentity, ChatMessage, ImageGenerator};
use crate::pipeline::address::{classify_intent, strip_address};
use crate::pipeline::gratitude;
use crate::pipeline::types::{CaptchaOutcome, ParsedCommand, SkipReason, TriageOutcome};
use crate::spam::SpamClassifier;
use crate::store::{
    ChatRecord, Database, NewMessage, SpamIncident, ThanksRecord, TurnRole, UserRecord,
};

const NOT_ALLOWED_TEXT: &str = "Извините, я не работаю в этом чате.";
const CANNOT_READ_TEXT: &str =
    "Мне нужны права администратора или участника в этой группе чтобы видеть сообщения.";
pub(super) const APOLOGY_TEXT: &str = "Извините, не получилось ответить. Попробуйте позже.";

/// The triage pipeline.
pub struct MessageTriage {
    pub(super) settings: TriageSettings,
    pub(super) channel: Arc<dyn Channel>,
    pub(super) db: Arc<dyn Database>,
    pub(super) spam: SpamClassifier,
    pub(super) captcha: CaptchaEngine,
    pub(super) context: ContextStore,
    pub(super) ai: Arc<AiExecutor>,
    pub(super) images: Option<Arc<ImageGenerator>>,
}

impl MessageTriage {
    pub fn new(
        settings: TriageSettings,
        channel: Arc<dyn Channel>,
        db: Arc<dyn Database>,
        ai: Arc<AiExecutor>,
    ) -> Self {
        Self {
            settings,
            channel,
            captcha: CaptchaEngine::new(Arc::clone(&db)),
            context: ContextStore::new(Arc::clone(&db)),
            db,
            spam: SpamClassifier::default_rules(),
            ai,
            images: None,
        }
    }

    pub fn with_image_generator(mut self, images: Arc<ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn settings(&self) -> &TriageSettings {
        &self.settings
    }

    /// Consume the update stream one message at a time until it ends.
    pub async fn run(&self, mut stream: MessageStream) {
        info!("Triage loop started");
        while let Some(message) = stream.next().await {
            self.process_guarded(&message).await;
        }
        info!("Update stream ended");
    }

    /// [`Self::process`] behind a panic boundary. Failures are logged, never
    /// propagated.
    pub async fn process_guarded(&self, message: &InboundMessage) -> Option<TriageOutcome> {
        let chat_id = message.chat.id;
        let message_id = message.message_id;
        match AssertUnwindSafe(self.process(message)).catch_unwind().await {
            Ok(Ok(outcome)) => {
                debug!(chat_id, message_id, outcome = outcome.label(), "Message triaged");
                Some(outcome)
            }
            Ok(Err(e)) => {
                error!(chat_id, message_id, error = %e, "Failed to process message");
                None
            }
            Err(_) => {
                error!(chat_id, message_id, "Message handler panicked");
                None
            }
        }
    }

    /// Triage one message.
    pub async fn process(&self, message: &InboundMessage) -> Result<TriageOutcome, PipelineError> {
        let started = Instant::now();
        let chat_id = message.chat.id;
        let is_group = message.chat.kind.is_group();

        if !message.new_members.is_empty() {
            if self.is_stale(message) {
                debug!(chat_id, message_id = message.message_id, "Stale join event, no captcha");
                return Ok(TriageOutcome::Skipped(SkipReason::Stale));
            }
            return self.handle_joins(message).await;
        }

        if message.from.is_none() || message.text.trim().is_empty() {
            return Ok(TriageOutcome::Skipped(SkipReason::Empty));
        }

        if self.is_stale(message) {
            if is_group && self.settings.is_chat_allowed(chat_id) {
                self.remember_participants(message).await;
                self.persist(message).await;
            }
            debug!(chat_id, message_id = message.message_id, "Stale message, not reacting");
            return Ok(TriageOutcome::Skipped(SkipReason::Stale));
        }

        let command = ParsedCommand::parse(&message.text);
        if let Some(ref parsed) = command {
            if !parsed.is_for(&self.settings.bot.username) {
                return Ok(TriageOutcome::Skipped(SkipReason::OtherBot));
            }
        }
        let address = strip_address(message, &self.settings.bot, &self.settings.bot_aliases);
        let wants_bot = command.is_some() || address.is_some();

        if !self.settings.is_chat_allowed(chat_id) {
            return self
                .refuse_or_skip(chat_id, wants_bot, SkipReason::ChatNotAllowed, NOT_ALLOWED_TEXT)
                .await;
        }

        if is_group && !self.bot_can_read(chat_id).await {
            return self
                .refuse_or_skip(chat_id, wants_bot, SkipReason::CannotRead, CANNOT_READ_TEXT)
                .await;
        }

        self.remember_participants(message).await;

        if is_group {
            let verdict = self.spam.classify(&message.text);
            if verdict.is_spam {
                return self.handle_spam(message, verdict.reason).await;
            }

            if self.settings.captcha_enabled {
                if let Some(outcome) = self.check_captcha(message).await? {
                    return Ok(TriageOutcome::Captcha(outcome));
                }
            }
        }

        if gratitude::contains_gratitude(&message.text) {
            if let Some(outcome) = self.handle_gratitude(message).await? {
                return Ok(outcome);
            }
        }

        if let Some(parsed) = command {
            self.dispatch_command(message, &parsed, started).await?;
            return Ok(TriageOutcome::Command(parsed.command.name().to_string()));
        }

        if let Some(stripped) = address {
            let intent = classify_intent(&stripped);
            self.handle_intent(message, &intent).await?;
            return Ok(TriageOutcome::Addressed(intent));
        }

        if self.is_reply_to_bot(message) {
            self.dialogue(message, &message.text).await?;
            return Ok(TriageOutcome::Dialogue);
        }

        if is_group {
            self.persist(message).await;
            return Ok(TriageOutcome::Persisted);
        }

        Ok(TriageOutcome::Skipped(SkipReason::Empty))
    }

    // ── Gates ───────────────────────────────────────────────────────

    fn is_stale(&self, message: &InboundMessage) -> bool {
        let age = Utc::now() - message.date;
        age.to_std()
            .map(|age| age > self.settings.stale_after)
            .unwrap_or(false)
    }

    async fn bot_can_read(&self, chat_id: i64) -> bool {
        match self
            .channel
            .get_chat_member(chat_id, self.settings.bot.id)
            .await
        {
            Ok(status) => status.can_read(),
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to check bot membership");
                false
            }
        }
    }

    async fn refuse_or_skip(
        &self,
        chat_id: i64,
        wants_bot: bool,
        reason: SkipReason,
        explanation: &str,
    ) -> Result<TriageOutcome, PipelineError> {
        if !wants_bot {
            return Ok(TriageOutcome::Skipped(reason));
        }
        info!(chat_id, reason = reason.label(), "Refusing request");
        self.channel.send_text(chat_id, explanation, None).await?;
        Ok(TriageOutcome::Refused(reason))
    }

    fn is_reply_to_bot(&self, message: &InboundMessage) -> bool {
        message
            .reply_to
            .as_ref()
            .and_then(|r| r.author.as_ref())
            .is_some_and(|author| author.id == self.settings.bot.id)
    }

    /// Config list, Telegram admin/creator, or a stored `admin` role.
    pub(super) async fn is_admin(&self, chat_id: i64, user_id: i64) -> bool {
        if self.settings.admin_users.contains(&user_id) {
            return true;
        }

        match self.channel.get_chat_member(chat_id, user_id).await {
            Ok(status) if status.is_admin() => return true,
            Ok(_) => {}
            Err(e) => warn!(chat_id, user_id, error = %e, "Failed to fetch member status"),
        }

        self.db
            .has_admin_role(chat_id, user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(chat_id, user_id, error = %e, "Failed to read stored role");
                false
            })
    }

    // ── Moderation ──────────────────────────────────────────────────

    async fn handle_spam(
        &self,
        message: &InboundMessage,
        reason: String,
    ) -> Result<TriageOutcome, PipelineError> {
        let chat_id = message.chat.id;
        let user_id = message.author_id();
        let author = message.author_name();
        info!(chat_id, user_id, reason = %reason, "Spam detected");

        let incident = SpamIncident {
            chat_id,
            user_id,
            message_text: message.text.clone(),
            reason: reason.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.db.insert_spam_incident(&incident).await {
            warn!(chat_id, user_id, error = %e, "Failed to log spam incident");
        }

        let chat_title = message.chat.title.as_deref().unwrap_or("без названия");
        let note = format!(
            "🚨 Подозрение на спам в чате «{chat_title}» от {author}:\n\n{}\n\nПричина: {reason}",
            message.text
        );
        match self.channel.get_administrators(chat_id).await {
            Ok(admins) => {
                for admin in admins.iter().filter(|a| !a.is_bot) {
                    if let Err(e) = self.channel.send_text(admin.id, &note, None).await {
                        debug!(chat_id, admin_id = admin.id, error = %e, "Admin not reachable");
                    }
                }
            }
            Err(e) => warn!(chat_id, error = %e, "Failed to list administrators"),
        }

        self.channel
            .send_text(
                chat_id,
                &format!(
                    "⚠️ {author}, ваше сообщение похоже на спам ({reason}). Администраторы уведомлены."
                ),
                Some(message.message_id),
            )
            .await?;

        Ok(TriageOutcome::Spam { reason })
    }

    async fn handle_gratitude(
        &self,
        message: &InboundMessage,
    ) -> Result<Option<TriageOutcome>, PipelineError> {
        let chat_id = message.chat.id;
        let Some(target) = gratitude::resolve_target(message, self.db.as_ref()).await? else {
            return Ok(None);
        };

        self.remember_user(&target).await;
        self.db
            .insert_thanks(&ThanksRecord {
                chat_id,
                from_user_id: message.author_id(),
                to_user_id: target.id,
                text: message.text.clone(),
                timestamp: message.date,
                message_id: message.message_id,
            })
            .await?;
        let tally = self.db.thanks_received(chat_id, target.id).await?;

        if message.chat.kind.is_group() {
            self.persist(message).await;
        }

        info!(chat_id, to_user_id = target.id, tally, "Thanks recorded");
        self.channel
            .send_text(
                chat_id,
                &format!(
                    "🙏 {} получает благодарность! Всего благодарностей: {tally}",
                    target.display_name()
                ),
                Some(message.message_id),
            )
            .await?;

        Ok(Some(TriageOutcome::Thanked {
            to_user_id: target.id,
            tally,
        }))
    }

    // ── Captcha ─────────────────────────────────────────────────────

    async fn handle_joins(&self, message: &InboundMessage) -> Result<TriageOutcome, PipelineError> {
        let chat_id = message.chat.id;
        if !self.settings.captcha_enabled || !self.settings.is_chat_allowed(chat_id) {
            return Ok(TriageOutcome::Joined { challenged: 0 });
        }
        if message.chat.kind.is_group() && !self.bot_can_read(chat_id).await {
            return Ok(TriageOutcome::Skipped(SkipReason::CannotRead));
        }

        let mut challenged = 0;
        for member in &message.new_members {
            if member.is_bot || member.id == self.settings.bot.id {
                continue;
            }
            self.remember_user(member).await;
            if self.captcha.has_passed(chat_id, member.id).await? {
                debug!(chat_id, user_id = member.id, "Returning member, no captcha");
                continue;
            }

            let issued = self.captcha.issue(chat_id, member.id).await?;
            self.channel
                .send_text(
                    chat_id,
                    &format!(
                        "{}, добро пожаловать! Чтобы остаться в чате, ответьте на вопрос:\n{}\nНа ответ {CAPTCHA_TTL_MINUTES} минут.",
                        member.display_name(),
                        issued.prompt
                    ),
                    None,
                )
                .await?;
            challenged += 1;
        }

        Ok(TriageOutcome::Joined { challenged })
    }

    /// Treat the message as a captcha answer if its author has a pending challenge.
    async fn check_captcha(
        &self,
        message: &InboundMessage,
    ) -> Result<Option<CaptchaOutcome>, PipelineError> {
        let chat_id = message.chat.id;
        let user_id = message.author_id();
        if self.captcha.active(chat_id, user_id).await?.is_none() {
            return Ok(None);
        }

        let name = message.author_name();
        let (outcome, reply) = match self.captcha.verify(chat_id, user_id, &message.text).await {
            Ok(true) => (
                CaptchaOutcome::Passed,
                format!("{name}, верно! Добро пожаловать в чат 🎉"),
            ),
            Ok(false) => {
                let next = self.captcha.issue(chat_id, user_id).await?;
                (
                    CaptchaOutcome::Failed,
                    format!("{name}, неверно. Попробуйте ещё раз:\n{}", next.prompt),
                )
            }
            Err(CaptchaError::Expired { .. }) => {
                let next = self.captcha.issue(chat_id, user_id).await?;
                (
                    CaptchaOutcome::Expired,
                    format!("{name}, время на ответ истекло. Новый вопрос:\n{}", next.prompt),
                )
            }
            Err(CaptchaError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        self.channel
            .send_text(chat_id, &reply, Some(message.message_id))
            .await?;
        Ok(Some(outcome))
    }

    // ── Dialogue ────────────────────────────────────────────────────

    /// One dialogue turn. Context is best-effort: storage failures are
    /// logged and the reply is still generated.
    pub(super) async fn dialogue(
        &self,
        message: &InboundMessage,
        text: &str,
    ) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        let user_id = message.author_id();
        let identity = CallIdentity { chat_id, user_id };

        let appended = match self
            .context
            .append(chat_id, user_id, TurnRole::User, text, Utc::now())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(chat_id, user_id, error = %e, "Failed to append user turn");
                false
            }
        };

        let history = if appended {
            match self
                .context
                .read(
                    chat_id,
                    user_id,
                    self.settings.context_max_turns,
                    self.settings.context_max_age_hours,
                )
                .await
            {
                Ok(turns) => Some(turns),
                Err(e) => {
                    warn!(chat_id, user_id, error = %e, "Failed to read context");
                    None
                }
            }
        } else {
            None
        };

        let custom = self.db.get_user_ai_info(user_id).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "Failed to read user prompt");
            None
        });
        let system = match custom {
            Some(info) if !info.trim().is_empty() => {
                format!("{}\n\n{}", info.trim(), self.settings.prompts.dialogue)
            }
            _ => self.settings.prompts.dialogue.clone(),
        };

        let mut messages = vec![ChatMessage::system(system)];
        match history {
            Some(turns) => messages.extend(
                turns
                    .into_iter()
                    .map(|t| ChatMessage::with_role(t.role.as_str(), t.content)),
            ),
            None => messages.push(ChatMessage::user(text)),
        }

        match self.ai.complete(messages, identity).await {
            Ok(completion) if !completion.text.is_empty() => {
                if let Err(e) = self
                    .context
                    .append(
                        chat_id,
                        user_id,
                        TurnRole::Assistant,
                        &completion.text,
                        Utc::now(),
                    )
                    .await
                {
                    warn!(chat_id, user_id, error = %e, "Failed to append assistant turn");
                }
                self.channel
                    .send_text(chat_id, &completion.text, Some(message.message_id))
                    .await?;
            }
            Ok(_) => {
                warn!(chat_id, user_id, "Completion was empty after cleanup");
                self.channel
                    .send_text(chat_id, APOLOGY_TEXT, Some(message.message_id))
                    .await?;
            }
            Err(e) => {
                warn!(chat_id, user_id, error = %e, "Dialogue completion failed");
                self.channel
                    .send_text(chat_id, APOLOGY_TEXT, Some(message.message_id))
                    .await?;
            }
        }
        Ok(())
    }

    // ── Persistence ─────────────────────────────────────────────────

    async fn remember_participants(&self, message: &InboundMessage) {
        let chat = &message.chat;
        let title = match (chat.kind, chat.title.as_deref()) {
            (_, Some(title)) if !title.is_empty() => title.to_string(),
            (ChatKind::Private, _) => message.author_name(),
            (ChatKind::Channel, _) => "Channel".to_string(),
            _ => "Group Chat".to_string(),
        };
        let record = ChatRecord {
            id: chat.id,
            title,
            kind: chat.kind.as_str().to_string(),
            username: chat.username.clone(),
        };
        if let Err(e) = self.db.upsert_chat(&record).await {
            warn!(chat_id = chat.id, error = %e, "Failed to save chat");
        }

        if let Some(ref user) = message.from {
            self.remember_user(user).await;
        }
        if let Some(author) = message.reply_to.as_ref().and_then(|r| r.author.as_ref()) {
            self.remember_user(author).await;
        }
    }

    async fn remember_user(&self, user: &UserRef) {
        let record = UserRecord {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        };
        if let Err(e) = self.db.upsert_user(&record).await {
            warn!(user_id = user.id, error = %e, "Failed to save user");
        }
    }

    async fn persist(&self, message: &InboundMessage) {
        let record = NewMessage {
            chat_id: message.chat.id,
            user_id: message.author_id(),
            message_id: message.message_id,
            text: message.text.clone(),
            timestamp: message.date,
        };
        if let Err(e) = self.db.insert_message(&record).await {
            warn!(chat_id = message.chat.id, error = %e, "Failed to save message");
        }
    }
}
