//! Scoped "typing…" indicator.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::channels::{Channel, ChatAction};

/// Telegram clears a chat action after about five seconds.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Keeps a chat action visible until dropped.
pub struct TypingIndicator {
    handle: JoinHandle<()>,
}

impl TypingIndicator {
    /// Send the action once, then keep refreshing it in the background.
    pub async fn start(channel: Arc<dyn Channel>, chat_id: i64, action: ChatAction) -> Self {
        Self::start_with_interval(channel, chat_id, action, REFRESH_INTERVAL).await
    }

    pub async fn start_with_interval(
        channel: Arc<dyn Channel>,
        chat_id: i64,
        action: ChatAction,
        every: Duration,
    ) -> Self {
        send_action(channel.as_ref(), chat_id, action).await;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                interval.tick().await;
                send_action(channel.as_ref(), chat_id, action).await;
            }
        });
        Self { handle }
    }
}

async fn send_action(channel: &dyn Channel, chat_id: i64, action: ChatAction) {
    if let Err(e) = channel.send_chat_action(chat_id, action).await {
        debug!(chat_id, error = %e, "Failed to send chat action");
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingChannel;

    #[tokio::test]
    async fn refreshes_until_dropped() {
        let channel = Arc::new(RecordingChannel::new());
        let indicator = TypingIndicator::start_with_interval(
            channel.clone(),
            -1,
            ChatAction::Typing,
            Duration::from_millis(10),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(45)).await;
        drop(indicator);

        let sent = channel.actions().len();
        assert!(sent >= 2, "expected repeated actions, got {sent}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(channel.actions().len(), sent);
        assert!(channel.actions().iter().all(|(chat, a)| *chat == -1 && *a == ChatAction::Typing));
    }

    #[tokio::test]
    async fn first_action_is_sent_before_start_returns() {
        let channel = Arc::new(RecordingChannel::new());
        let indicator =
            TypingIndicator::start(channel.clone(), -7, ChatAction::UploadPhoto).await;
        assert_eq!(channel.actions(), vec![(-7, ChatAction::UploadPhoto)]);
        drop(indicator);
    }
}
