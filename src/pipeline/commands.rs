//! Command and address-intent handlers.

use std::fmt::Write;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::channels::{ChatAction, InboundMessage};
use crate::error::PipelineError;
use crate::llm::CallIdentity;
use crate::pipeline::address::AddressIntent;
use crate::pipeline::prompts::{
    fill_template, format_duration, format_log, help_text, random_summary_title,
    random_unknown_command_reply,
};
use crate::pipeline::triage::MessageTriage;
use crate::pipeline::types::{Command, ParsedCommand};
use crate::store::ChatLogEntry;
use crate::typing::TypingIndicator;

/// Messages fed to the joke and topic prompts.
const SHORT_CONTEXT_MESSAGES: usize = 10;

/// Window the summary, joke and topic commands read from.
const LOG_WINDOW_HOURS: i64 = 24;

const AI_STATS_DAYS: i64 = 30;

const NOT_ADMIN_TEXT: &str = "У вас нет прав администратора в этой группе";

const START_TEXT: &str = "Привет! Я бот для создания кратких пересказов обсуждений. Используй /summary для получения сводки.";

impl MessageTriage {
    pub(super) async fn dispatch_command(
        &self,
        message: &InboundMessage,
        parsed: &ParsedCommand,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        info!(
            chat_id,
            user_id = message.author_id(),
            command = parsed.command.name(),
            "Command received"
        );

        if parsed.command.is_admin_only() && !self.is_admin(chat_id, message.author_id()).await {
            self.channel.send_text(chat_id, NOT_ADMIN_TEXT, None).await?;
            return Ok(());
        }

        match &parsed.command {
            Command::Start => {
                self.channel.send_text(chat_id, START_TEXT, None).await?;
            }
            Command::Help => self.send_help(chat_id).await?,
            Command::Ping => self.ping(message, started).await?,
            Command::Summary => self.summary(message, &parsed.args).await?,
            Command::Stats => self.stats(chat_id).await?,
            Command::AiStats => self.ai_stats(chat_id).await?,
            Command::Joke => {
                self.generate_from_log(
                    message,
                    &self.settings.prompts.joke,
                    "📝 Анекдот:",
                    "Не смог придумать анекдот, попробуй позже.",
                )
                .await?
            }
            Command::Topic => {
                self.generate_from_log(
                    message,
                    &self.settings.prompts.topic,
                    "💬 Тема для обсуждения:",
                    "Не смог придумать тему, попробуй позже.",
                )
                .await?
            }
            Command::Clear => self.clear_context(message).await?,
            Command::Say => self.say(message, &parsed.args).await?,
            Command::Image => self.image(message, &parsed.args).await?,
            Command::Unknown(_) => {
                let reply = random_unknown_command_reply(&mut rand::thread_rng());
                self.channel.send_text(chat_id, reply, None).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn handle_intent(
        &self,
        message: &InboundMessage,
        intent: &AddressIntent,
    ) -> Result<(), PipelineError> {
        info!(
            chat_id = message.chat.id,
            user_id = message.author_id(),
            intent = intent.label(),
            "Bot addressed"
        );
        match intent {
            AddressIntent::Forget => self.clear_context(message).await,
            AddressIntent::Summary => self.summary(message, "").await,
            AddressIntent::Help => self.send_help(message.chat.id).await,
            AddressIntent::Dialogue(text) => self.dialogue(message, text).await,
        }
    }

    async fn send_help(&self, chat_id: i64) -> Result<(), PipelineError> {
        self.channel
            .send_text(chat_id, &help_text(&self.settings.bot.username), None)
            .await?;
        Ok(())
    }

    async fn ping(&self, message: &InboundMessage, started: Instant) -> Result<(), PipelineError> {
        let now = Utc::now();
        let reply = format!(
            "🏓 Pong!\n⏱ Время обработки: {} ms\n🕒 Время сервера: {}\n⏳ Задержка сообщения: {}",
            started.elapsed().as_millis(),
            now.format("%d.%m.%Y %H:%M:%S UTC"),
            format_duration(now - message.date),
        );
        self.channel.send_text(message.chat.id, &reply, None).await?;
        Ok(())
    }

    /// Recent chat log, oldest first.
    async fn recent_log(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, PipelineError> {
        let since = Utc::now() - Duration::hours(LOG_WINDOW_HOURS);
        let mut entries = self.db.recent_messages(chat_id, since, limit).await?;
        entries.reverse();
        Ok(entries)
    }

    async fn summary(&self, message: &InboundMessage, args: &str) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        let limit = self.settings.summary_limit;

        let requested = args
            .split_whitespace()
            .next()
            .and_then(|a| a.parse::<usize>().ok())
            .filter(|n| *n > 0);
        let count = match requested {
            Some(n) if n > limit => {
                self.channel
                    .send_text(chat_id, &format!("Я помню только {limit} сообщений..."), None)
                    .await?;
                limit
            }
            Some(n) => n,
            None => limit,
        };

        let entries = self.recent_log(chat_id, count).await?;
        if entries.is_empty() {
            self.channel
                .send_text(
                    chat_id,
                    &format!(
                        "Нет сообщений за последние {LOG_WINDOW_HOURS} часа, я похоже спал =)"
                    ),
                    None,
                )
                .await?;
            return Ok(());
        }

        let prompt = fill_template(&self.settings.prompts.summary, &format_log(&entries));
        let identity = CallIdentity {
            chat_id,
            user_id: message.author_id(),
        };
        let title = random_summary_title(&mut rand::thread_rng());

        match self
            .ai
            .prompt(&self.settings.prompts.system, &prompt, identity)
            .await
        {
            Ok(completion) => {
                self.channel
                    .send_text(chat_id, &format!("{title}\n\n{}", completion.text), None)
                    .await?;
            }
            Err(e) => {
                warn!(chat_id, error = %e, "Summary generation failed");
                self.channel
                    .send_text(chat_id, "Произошла ошибка при создании сводки.", None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn generate_from_log(
        &self,
        message: &InboundMessage,
        template: &str,
        header: &str,
        failure: &str,
    ) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        let entries = self.recent_log(chat_id, SHORT_CONTEXT_MESSAGES).await?;
        if entries.is_empty() {
            self.channel
                .send_text(chat_id, "За последние сутки в чате тихо, мне не из чего исходить.", None)
                .await?;
            return Ok(());
        }

        let prompt = fill_template(template, &format_log(&entries));
        let identity = CallIdentity {
            chat_id,
            user_id: message.author_id(),
        };
        match self
            .ai
            .prompt(&self.settings.prompts.system, &prompt, identity)
            .await
        {
            Ok(completion) => {
                self.channel
                    .send_text(chat_id, &format!("{header}\n\n{}", completion.text), None)
                    .await?;
            }
            Err(e) => {
                warn!(chat_id, error = %e, "Generation failed");
                self.channel.send_text(chat_id, failure, None).await?;
            }
        }
        Ok(())
    }

    async fn stats(&self, chat_id: i64) -> Result<(), PipelineError> {
        let day_start = Utc::now() - Duration::hours(24);
        let stats = self.db.message_stats(chat_id, day_start).await?;
        let thanked = self.db.top_thanked(chat_id, 10).await?;

        let mut out = String::from("📊 Статистика чата:\n\n");
        let _ = writeln!(out, "Всего сообщений: {}", stats.total);
        let _ = writeln!(out, "Сообщений за сутки: {}", stats.last_day);

        if !stats.top_users.is_empty() {
            out.push_str("\nТоп-10 активных пользователей:\n");
            for (rank, (name, count)) in stats.top_users.iter().enumerate() {
                let _ = writeln!(out, "{}. {name} - {count} сообщ.", rank + 1);
            }
        }

        if !thanked.is_empty() {
            out.push_str("\n🙏 Больше всего благодарностей:\n");
            for (rank, (name, count)) in thanked.iter().enumerate() {
                let _ = writeln!(out, "{}. {name} - {count}", rank + 1);
            }
        }

        self.channel.send_text(chat_id, out.trim_end(), None).await?;
        Ok(())
    }

    async fn ai_stats(&self, chat_id: i64) -> Result<(), PipelineError> {
        let since = Utc::now() - Duration::days(AI_STATS_DAYS);
        let usage = self.db.billing_usage_by_chat(chat_id, since).await?;
        let top = self.db.billing_top_users(chat_id, since, 5).await?;

        let mut out = String::from("Статистика использования AI за последний месяц:\n");
        let _ = writeln!(out, "- Запросов: {}", usage.call_count);
        let _ = writeln!(out, "- Всего токенов: {}", usage.total_tokens);
        let _ = writeln!(out, "- Токенов в промптах: {}", usage.prompt_tokens);
        let _ = writeln!(out, "- Токенов в ответах: {}", usage.completion_tokens);
        let _ = writeln!(out, "- Стоимость: {:.2} USD", usage.cost);

        if !top.is_empty() {
            out.push_str("\nТоп пользователей:\n");
            for (rank, user) in top.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. {} - {} токенов, {:.2} USD",
                    rank + 1,
                    user.name,
                    user.total_tokens,
                    user.cost
                );
            }
        }

        self.channel.send_text(chat_id, out.trim_end(), None).await?;
        Ok(())
    }

    async fn clear_context(&self, message: &InboundMessage) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        let reply = match self.context.clear(chat_id, message.author_id()).await {
            Ok(_) => "Контекст очищен, начнём с чистого листа.",
            Err(e) => {
                warn!(chat_id, error = %e, "Failed to clear context");
                "Не удалось очистить контекст."
            }
        };
        self.channel
            .send_text(chat_id, reply, Some(message.message_id))
            .await?;
        Ok(())
    }

    async fn say(&self, message: &InboundMessage, args: &str) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        if args.is_empty() {
            self.channel
                .send_text(chat_id, "Использование: /say [текст]", None)
                .await?;
            return Ok(());
        }

        self.channel.send_text(chat_id, args, None).await?;
        if let Err(e) = self
            .channel
            .delete_message(chat_id, message.message_id)
            .await
        {
            warn!(chat_id, error = %e, "Failed to delete /say command");
        }
        Ok(())
    }

    async fn image(&self, message: &InboundMessage, args: &str) -> Result<(), PipelineError> {
        let chat_id = message.chat.id;
        if args.is_empty() {
            self.channel
                .send_text(
                    chat_id,
                    "Пожалуйста, укажите описание для изображения после команды /img",
                    None,
                )
                .await?;
            return Ok(());
        }

        let Some(ref images) = self.images else {
            self.channel
                .send_text(chat_id, "Генерация изображений не настроена.", None)
                .await?;
            return Ok(());
        };

        let _uploading = TypingIndicator::start(
            std::sync::Arc::clone(&self.channel),
            chat_id,
            ChatAction::UploadPhoto,
        )
        .await;
        match images.generate(args).await {
            Ok(photo) => {
                self.channel
                    .send_photo(chat_id, photo, Some(message.message_id))
                    .await?;
            }
            Err(e) => {
                warn!(chat_id, error = %e, "Image generation failed");
                self.channel
                    .send_text(
                        chat_id,
                        "Не удалось сгенерировать изображение. Попробуйте снова.",
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
