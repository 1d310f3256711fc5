//! End-to-end triage tests over an in-memory database.
//!
//! Each test wires a real `MessageTriage` to a recording channel and a
//! canned completion backend, feeds it messages and checks both the
//! outcome and what ended up in storage.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use chat_sheriff::channels::{
    BotIdentity, Channel, ChatAction, ChatKind, ChatRef, InboundMessage, MemberStatus,
    MessageStream, PhotoAttachment, ReplyRef, UserRef,
};
use chat_sheriff::config::TriageSettings;
use chat_sheriff::error::{ChannelError, LlmError};
use chat_sheriff::llm::{
    AiExecutor, ChatRequest, ChatResponse, Choice, ChoiceMessage, CompletionBackend, CostTable,
    ExecutorSettings, RetryPolicy, TokenUsage,
};
use chat_sheriff::pipeline::{CaptchaOutcome, MessageTriage, SkipReason, TriageOutcome};
use chat_sheriff::store::{Database, LibSqlBackend};

const BOT_ID: i64 = 1;
const CHAT_ID: i64 = -100;
const ALICE: i64 = 10;
const BOB: i64 = 20;

// ── Stubs ───────────────────────────────────────────────────────────

/// Channel stub that records outgoing texts.
struct StubChannel {
    sent: Mutex<Vec<(i64, String, Option<i64>)>>,
}

impl StubChannel {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == chat_id)
            .map(|(_, text, _)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Channel for StubChannel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id, text.to_string(), reply_to));
        Ok(5000 + sent.len() as i64)
    }

    async fn send_photo(
        &self,
        _chat_id: i64,
        _photo: PhotoAttachment,
        _reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn send_chat_action(
        &self,
        _chat_id: i64,
        _action: ChatAction,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn get_chat_member(
        &self,
        _chat_id: i64,
        _user_id: i64,
    ) -> Result<MemberStatus, ChannelError> {
        Ok(MemberStatus::Member)
    }

    async fn get_administrators(&self, _chat_id: i64) -> Result<Vec<UserRef>, ChannelError> {
        Ok(vec![UserRef {
            id: 99,
            first_name: "Admin".into(),
            ..Default::default()
        }])
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn get_me(&self) -> Result<BotIdentity, ChannelError> {
        Ok(bot())
    }
}

/// Completion backend that always answers the same text.
struct StubBackend {
    answer: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl StubBackend {
    fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChatResponse {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(self.answer.clone()),
                },
            }],
            model: "stub-model".into(),
            usage: TokenUsage {
                prompt_tokens: 30,
                completion_tokens: 10,
                total_tokens: 40,
            },
        })
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

struct Harness {
    triage: MessageTriage,
    channel: Arc<StubChannel>,
    backend: Arc<StubBackend>,
    db: Arc<LibSqlBackend>,
}

fn bot() -> BotIdentity {
    BotIdentity {
        id: BOT_ID,
        username: "sheriff_bot".into(),
    }
}

async fn harness_with(settings: TriageSettings) -> Harness {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let dyn_db: Arc<dyn Database> = db.clone();
    let channel = Arc::new(StubChannel::new());
    let backend = Arc::new(StubBackend::new("Всё отлично, спасибо что спросил"));

    let ai = Arc::new(
        AiExecutor::new(
            backend.clone(),
            ExecutorSettings {
                model: "stub-model".into(),
                temperature: 0.5,
                max_tokens: 128,
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                costs: CostTable::default(),
            },
        )
        .with_billing(Arc::clone(&dyn_db)),
    );

    let triage = MessageTriage::new(settings, channel.clone(), dyn_db, ai);
    Harness {
        triage,
        channel,
        backend,
        db,
    }
}

async fn harness() -> Harness {
    harness_with(TriageSettings::new(bot())).await
}

fn user(id: i64, name: &str) -> UserRef {
    UserRef {
        id,
        username: Some(name.to_lowercase()),
        first_name: name.into(),
        ..Default::default()
    }
}

fn group_message(message_id: i64, from: UserRef, text: &str) -> InboundMessage {
    InboundMessage {
        message_id,
        chat: ChatRef {
            id: CHAT_ID,
            kind: ChatKind::Supergroup,
            title: Some("Test Group".into()),
            username: None,
        },
        from: Some(from),
        text: text.into(),
        date: Utc::now(),
        reply_to: None,
        entities: Vec::new(),
        new_members: Vec::new(),
    }
}

fn reply_to(mut message: InboundMessage, author: UserRef, text: &str) -> InboundMessage {
    message.reply_to = Some(ReplyRef {
        message_id: message.message_id - 1,
        author: Some(author),
        text: text.into(),
    });
    message
}

fn bot_user() -> UserRef {
    UserRef {
        id: BOT_ID,
        username: Some("sheriff_bot".into()),
        first_name: "Sheriff".into(),
        is_bot: true,
        ..Default::default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn thanks_in_reply_is_counted_not_flagged() {
    let h = harness().await;
    let msg = reply_to(
        group_message(2, user(ALICE, "Alice"), "спасибо большое, очень помог"),
        user(BOB, "Bob"),
        "держи ссылку на доку",
    );

    let outcome = h.triage.process(&msg).await.unwrap();
    assert_eq!(
        outcome,
        TriageOutcome::Thanked {
            to_user_id: BOB,
            tally: 1
        }
    );

    assert_eq!(h.db.table_row_count("mod_spam_incidents").await.unwrap(), 0);
    assert_eq!(h.db.table_row_count("mod_thanks").await.unwrap(), 1);
    assert_eq!(h.db.thanks_received(CHAT_ID, BOB).await.unwrap(), 1);
    // Thanks in a group still land in the chat log.
    assert_eq!(h.db.table_row_count("messages").await.unwrap(), 1);

    let sent = h.channel.sent_to(CHAT_ID);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("@bob"));
    assert!(sent[0].contains("Всего благодарностей: 1"));
}

#[tokio::test]
async fn shortened_link_with_money_talk_is_spam() {
    let h = harness().await;
    let msg = group_message(3, user(ALICE, "Alice"), "Лучшие инвестиции тут bit.ly/abc");

    let outcome = h.triage.process(&msg).await.unwrap();
    assert!(matches!(outcome, TriageOutcome::Spam { ref reason } if !reason.is_empty()));

    assert_eq!(h.db.table_row_count("mod_spam_incidents").await.unwrap(), 1);
    assert_eq!(h.db.table_row_count("messages").await.unwrap(), 0);

    // Admin gets a DM, the author gets a warning in the chat.
    assert_eq!(h.channel.sent_to(99).len(), 1);
    let warning = h.channel.sent_to(CHAT_ID);
    assert_eq!(warning.len(), 1);
    assert!(warning[0].contains("@alice"));
}

#[tokio::test]
async fn ping_command_replies_pong() {
    let h = harness().await;
    let msg = group_message(4, user(ALICE, "Alice"), "/ping@sheriff_bot");

    let outcome = h.triage.process(&msg).await.unwrap();
    assert_eq!(outcome, TriageOutcome::Command("ping".into()));

    let sent = h.channel.sent_to(CHAT_ID);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("🏓 Pong!"));
}

#[tokio::test]
async fn command_for_another_bot_is_ignored() {
    let h = harness().await;
    let msg = group_message(5, user(ALICE, "Alice"), "/ping@other_bot");

    let outcome = h.triage.process(&msg).await.unwrap();
    assert_eq!(outcome, TriageOutcome::Skipped(SkipReason::OtherBot));
    assert!(h.channel.sent_to(CHAT_ID).is_empty());
}

#[tokio::test]
async fn reply_chain_with_bot_keeps_context() {
    let h = harness().await;

    let first = reply_to(
        group_message(6, user(ALICE, "Alice"), "как дела?"),
        bot_user(),
        "Привет всем",
    );
    assert_eq!(
        h.triage.process(&first).await.unwrap(),
        TriageOutcome::Dialogue
    );

    let second = reply_to(
        group_message(8, user(ALICE, "Alice"), "а погода как?"),
        bot_user(),
        "Всё отлично, спасибо что спросил",
    );
    assert_eq!(
        h.triage.process(&second).await.unwrap(),
        TriageOutcome::Dialogue
    );

    // Two user turns and two assistant turns.
    assert_eq!(h.db.table_row_count("chat_context").await.unwrap(), 4);
    assert_eq!(h.db.table_row_count("ai_billing").await.unwrap(), 2);

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 2);
    let roles: Vec<&str> = requests[1]
        .messages
        .iter()
        .map(|m| m.role.as_str())
        .collect();
    assert_eq!(roles, ["system", "user", "assistant", "user"]);
    assert_eq!(requests[1].messages[3].content, "а погода как?");

    let sent = h.channel.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].2, Some(8));
}

#[tokio::test]
async fn alias_address_routes_to_dialogue() {
    let h = harness().await;
    let msg = group_message(9, user(BOB, "Bob"), "Шериф, расскажи что-нибудь");

    let outcome = h.triage.process(&msg).await.unwrap();
    assert!(matches!(outcome, TriageOutcome::Addressed(_)));

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 1);
    let last = requests[0].messages.last().unwrap();
    assert_eq!(last.content, "расскажи что-нибудь");
}

#[tokio::test]
async fn new_member_must_solve_captcha() {
    let h = harness().await;
    let newcomer = user(30, "Carol");

    let mut join = group_message(10, user(ALICE, "Alice"), "");
    join.new_members = vec![newcomer.clone(), bot_user()];
    assert_eq!(
        h.triage.process(&join).await.unwrap(),
        TriageOutcome::Joined { challenged: 1 }
    );
    assert!(h.channel.sent_to(CHAT_ID)[0].contains("@carol"));

    let pending = h
        .db
        .latest_unanswered_captcha(CHAT_ID, 30)
        .await
        .unwrap()
        .unwrap();

    let wrong = group_message(11, newcomer.clone(), &(pending.answer + 1).to_string());
    assert_eq!(
        h.triage.process(&wrong).await.unwrap(),
        TriageOutcome::Captcha(CaptchaOutcome::Failed)
    );

    let retry = h
        .db
        .latest_unanswered_captcha(CHAT_ID, 30)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(retry.id, pending.id);

    let right = group_message(12, newcomer.clone(), &retry.answer.to_string());
    assert_eq!(
        h.triage.process(&right).await.unwrap(),
        TriageOutcome::Captcha(CaptchaOutcome::Passed)
    );
    assert!(h.db.has_passed_captcha(CHAT_ID, 30).await.unwrap());

    // Once passed, ordinary messages go to the log.
    let chatter = group_message(13, newcomer, "всем привет");
    assert_eq!(
        h.triage.process(&chatter).await.unwrap(),
        TriageOutcome::Persisted
    );
}

#[tokio::test]
async fn chat_outside_allow_list_is_refused() {
    let mut settings = TriageSettings::new(bot());
    settings.allowed_chats = vec![-555];
    let h = harness_with(settings).await;

    let command = group_message(14, user(ALICE, "Alice"), "/summary");
    assert_eq!(
        h.triage.process(&command).await.unwrap(),
        TriageOutcome::Refused(SkipReason::ChatNotAllowed)
    );
    assert_eq!(h.channel.sent_to(CHAT_ID).len(), 1);

    let chatter = group_message(15, user(ALICE, "Alice"), "просто болтаю");
    assert_eq!(
        h.triage.process(&chatter).await.unwrap(),
        TriageOutcome::Skipped(SkipReason::ChatNotAllowed)
    );
    assert_eq!(h.channel.sent_to(CHAT_ID).len(), 1);
    assert_eq!(h.db.table_row_count("messages").await.unwrap(), 0);
}

#[tokio::test]
async fn stale_message_is_logged_silently() {
    let h = harness().await;
    let mut msg = group_message(16, user(ALICE, "Alice"), "/ping");
    msg.date = Utc::now() - chrono::Duration::hours(1);

    assert_eq!(
        h.triage.process(&msg).await.unwrap(),
        TriageOutcome::Skipped(SkipReason::Stale)
    );
    assert!(h.channel.sent_to(CHAT_ID).is_empty());
    assert_eq!(h.db.table_row_count("messages").await.unwrap(), 1);
}

#[tokio::test]
async fn summary_uses_logged_messages() {
    let h = harness().await;
    for (i, text) in ["обсуждаем релиз", "релиз в пятницу", "ок"].iter().enumerate() {
        let msg = group_message(20 + i as i64, user(BOB, "Bob"), text);
        assert_eq!(
            h.triage.process(&msg).await.unwrap(),
            TriageOutcome::Persisted
        );
    }

    let command = group_message(30, user(ALICE, "Alice"), "/summary");
    assert_eq!(
        h.triage.process(&command).await.unwrap(),
        TriageOutcome::Command("summary".into())
    );

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 1);
    let prompt = &requests[0].messages[1].content;
    assert!(prompt.contains("@bob: обсуждаем релиз"));
    assert!(prompt.find("обсуждаем релиз") < prompt.find("релиз в пятницу"));
}
