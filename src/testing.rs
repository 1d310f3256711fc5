//! In-memory doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::channels::{
    BotIdentity, Channel, ChatAction, MemberStatus, MessageStream, PhotoAttachment, UserRef,
};
use crate::error::{ChannelError, LlmError};
use crate::llm::{ChatRequest, ChatResponse, Choice, ChoiceMessage, CompletionBackend, TokenUsage};

/// A text the bot sent.
#[derive(Debug, Clone)]
pub struct SentText {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
}

/// Channel that records everything and talks to nobody.
pub struct RecordingChannel {
    texts: Mutex<Vec<SentText>>,
    photos: Mutex<Vec<(i64, PhotoAttachment)>>,
    actions: Mutex<Vec<(i64, ChatAction)>>,
    member_status: Mutex<MemberStatus>,
    admins: Mutex<Vec<UserRef>>,
    next_id: AtomicI64,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            texts: Mutex::new(Vec::new()),
            photos: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            member_status: Mutex::new(MemberStatus::Member),
            admins: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1000),
        }
    }

    pub fn set_member_status(&self, status: MemberStatus) {
        *self.member_status.lock().unwrap() = status;
    }

    pub fn set_admins(&self, admins: Vec<UserRef>) {
        *self.admins.lock().unwrap() = admins;
    }

    pub fn texts(&self) -> Vec<SentText> {
        self.texts.lock().unwrap().clone()
    }

    pub fn photos(&self) -> Vec<(i64, PhotoAttachment)> {
        self.photos.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<(i64, ChatAction)> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
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
        self.texts.lock().unwrap().push(SentText {
            chat_id,
            text: text.to_string(),
            reply_to,
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: PhotoAttachment,
        _reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        self.photos.lock().unwrap().push((chat_id, photo));
        Ok(())
    }

    async fn send_chat_action(
        &self,
        chat_id: i64,
        action: ChatAction,
    ) -> Result<(), ChannelError> {
        self.actions.lock().unwrap().push((chat_id, action));
        Ok(())
    }

    async fn get_chat_member(
        &self,
        _chat_id: i64,
        _user_id: i64,
    ) -> Result<MemberStatus, ChannelError> {
        Ok(*self.member_status.lock().unwrap())
    }

    async fn get_administrators(&self, _chat_id: i64) -> Result<Vec<UserRef>, ChannelError> {
        Ok(self.admins.lock().unwrap().clone())
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn get_me(&self) -> Result<BotIdentity, ChannelError> {
        Ok(BotIdentity {
            id: 1,
            username: "sheriff_bot".into(),
        })
    }
}

/// Build a one-choice response.
pub fn reply(content: &str, total_tokens: u32) -> ChatResponse {
    ChatResponse {
        choices: vec![Choice {
            message: ChoiceMessage {
                content: Some(content.to_string()),
            },
        }],
        model: "test-model".into(),
        usage: TokenUsage {
            prompt_tokens: total_tokens / 2,
            completion_tokens: total_tokens - total_tokens / 2,
            total_tokens,
        },
    }
}

/// Completion backend that plays back scripted results, then a default reply.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicU32,
    fallback: String,
}

impl ScriptedBackend {
    pub fn new(fallback: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            fallback: fallback.to_string(),
        }
    }

    pub fn push(&self, result: Result<ChatResponse, LlmError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(reply(&self.fallback, 0)))
    }
}
