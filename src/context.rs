//! Bounded per-(chat, user) conversation memory.
//!
//! Reads are bounded by turn count, by age, by both or by neither. The
//! retention sweep in [`crate::maintenance`] is a separate policy: it
//! decides what is kept, while read bounds only decide what one read sees.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::ContextError;
use crate::store::{ContextWindow, ConversationTurn, Database, TurnRole};

/// Conversation context store.
#[derive(Clone)]
pub struct ContextStore {
    db: Option<Arc<dyn Database>>,
}

impl ContextStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db: Some(db) }
    }

    /// A store with no backing database. Every operation fails with
    /// [`ContextError::NotInitialized`].
    pub fn detached() -> Self {
        Self { db: None }
    }

    fn db(&self) -> Result<&Arc<dyn Database>, ContextError> {
        self.db.as_ref().ok_or(ContextError::NotInitialized)
    }

    /// Append one turn.
    pub async fn append(
        &self,
        chat_id: i64,
        user_id: i64,
        role: TurnRole,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ContextError> {
        self.db()?
            .append_context_turn(&ConversationTurn {
                chat_id,
                user_id,
                role,
                content: content.to_string(),
                timestamp,
            })
            .await?;
        Ok(())
    }

    /// Read the pair's turns, oldest first.
    ///
    /// `max_turns == 0` and `max_age_hours == 0` each mean "no bound".
    pub async fn read(
        &self,
        chat_id: i64,
        user_id: i64,
        max_turns: usize,
        max_age_hours: i64,
    ) -> Result<Vec<ConversationTurn>, ContextError> {
        let window = ContextWindow {
            max_turns: (max_turns > 0).then_some(max_turns),
            since: (max_age_hours > 0).then(|| Utc::now() - Duration::hours(max_age_hours)),
        };

        let mut turns = self
            .db()?
            .read_context_window(chat_id, user_id, window)
            .await?;
        turns.reverse();
        Ok(turns)
    }

    /// Forget everything for the pair.
    pub async fn clear(&self, chat_id: i64, user_id: i64) -> Result<u64, ContextError> {
        let removed = self.db()?.delete_context(chat_id, user_id).await?;
        debug!(chat_id, user_id, removed, "Context cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn store() -> ContextStore {
        ContextStore::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn max_turns_returns_most_recent_in_order() {
        let store = store().await;
        let base = Utc::now() - Duration::hours(1);
        for i in 0..50 {
            let role = if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
            store
                .append(-1, 7, role, &format!("turn {i}"), base + Duration::seconds(i))
                .await
                .unwrap();
        }

        let turns = store.read(-1, 7, 10, 0).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.clone()).collect();
        let expected: Vec<_> = (40..50).map(|i| format!("turn {i}")).collect();
        assert_eq!(contents, expected);
        assert_eq!(turns[9].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn max_age_excludes_old_turns() {
        let store = store().await;
        let now = Utc::now();
        for hours_ago in [47, 36, 25, 23, 12, 1] {
            store
                .append(
                    -1,
                    7,
                    TurnRole::User,
                    &format!("{hours_ago}h ago"),
                    now - Duration::hours(hours_ago),
                )
                .await
                .unwrap();
        }

        let turns = store.read(-1, 7, 0, 24).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["23h ago", "12h ago", "1h ago"]);
    }

    #[tokio::test]
    async fn both_bounds_apply_together() {
        let store = store().await;
        let now = Utc::now();
        for hours_ago in [30, 3, 2, 1] {
            store
                .append(-1, 7, TurnRole::User, &format!("{hours_ago}"), now - Duration::hours(hours_ago))
                .await
                .unwrap();
        }
        let turns = store.read(-1, 7, 2, 24).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "1"]);

        assert_eq!(store.read(-1, 7, 0, 0).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn clear_only_touches_the_pair() {
        let store = store().await;
        let now = Utc::now();
        store.append(-1, 7, TurnRole::User, "mine", now).await.unwrap();
        store.append(-1, 8, TurnRole::User, "theirs", now).await.unwrap();

        assert_eq!(store.clear(-1, 7).await.unwrap(), 1);
        assert!(store.read(-1, 7, 0, 0).await.unwrap().is_empty());
        assert_eq!(store.read(-1, 8, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detached_store_reports_not_initialized() {
        let store = ContextStore::detached();
        assert!(matches!(
            store.clear(-1, 7).await,
            Err(ContextError::NotInitialized)
        ));
        assert!(matches!(
            store.read(-1, 7, 5, 0).await,
            Err(ContextError::NotInitialized)
        ));
    }
}
