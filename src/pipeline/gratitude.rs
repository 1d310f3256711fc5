//! "Спасибо" detection and attribution.

use tracing::debug;

use crate::channels::{EntityKind, InboundMessage, UserRef};
use crate::error::DatabaseError;
use crate::store::Database;

const TRIGGERS: &[&str] = &["спасибо", "спс ", "благодарю"];

/// Whether the text thanks someone.
pub fn contains_gratitude(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.trim() == "спс" || TRIGGERS.iter().any(|t| lower.contains(t))
}

/// Who is being thanked: the replied-to author, else the first mention that
/// resolves to a known user. Self-thanks resolve to nobody.
pub async fn resolve_target(
    message: &InboundMessage,
    db: &dyn Database,
) -> Result<Option<UserRef>, DatabaseError> {
    let author_id = message.author_id();

    let target = match message.reply_to.as_ref().and_then(|r| r.author.clone()) {
        Some(author) => Some(author),
        None => first_mentioned_user(message, db).await?,
    };

    Ok(target.filter(|user| {
        let is_self = user.id == author_id;
        if is_self {
            debug!(user_id = author_id, "Ignoring self-thanks");
        }
        !is_self
    }))
}

async fn first_mentioned_user(
    message: &InboundMessage,
    db: &dyn Database,
) -> Result<Option<UserRef>, DatabaseError> {
    for entity in &message.entities {
        match &entity.kind {
            EntityKind::TextMention(user) => return Ok(Some(user.clone())),
            EntityKind::Mention => {
                let Some(mention) = entity.text_in(&message.text) else {
                    continue;
                };
                let username = mention.trim_start_matches('@');
                if let Some(record) = db.find_user_by_username(username).await? {
                    return Ok(Some(UserRef {
                        id: record.id,
                        username: record.username,
                        first_name: record.first_name,
                        last_name: record.last_name,
                        is_bot: false,
                    }));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChatKind, ChatRef, Entity, ReplyRef};
    use crate::store::{LibSqlBackend, UserRecord};
    use chrono::Utc;

    fn user(id: i64, username: &str) -> UserRef {
        UserRef {
            id,
            username: Some(username.into()),
            first_name: username.into(),
            ..Default::default()
        }
    }

    fn message(text: &str, reply_author: Option<UserRef>, entities: Vec<Entity>) -> InboundMessage {
        InboundMessage {
            message_id: 10,
            chat: ChatRef {
                id: -1,
                kind: ChatKind::Supergroup,
                title: None,
                username: None,
            },
            from: Some(user(7, "anna")),
            text: text.into(),
            date: Utc::now(),
            reply_to: reply_author.map(|author| ReplyRef {
                message_id: 9,
                author: Some(author),
                text: "help".into(),
            }),
            entities,
            new_members: vec![],
        }
    }

    #[test]
    fn triggers_are_case_insensitive() {
        assert!(contains_gratitude("Спасибо большое!"));
        assert!(contains_gratitude("спс"));
        assert!(contains_gratitude("спс бро"));
        assert!(contains_gratitude("БЛАГОДАРЮ"));
        assert!(!contains_gratitude("спсибо нет"));
        assert!(!contains_gratitude("привет"));
    }

    #[tokio::test]
    async fn reply_author_is_the_target() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let m = message("спасибо", Some(user(8, "bob")), vec![]);
        let target = resolve_target(&m, &db).await.unwrap().unwrap();
        assert_eq!(target.id, 8);
    }

    #[tokio::test]
    async fn mention_resolves_through_the_store() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.upsert_user(&UserRecord {
            id: 9,
            username: Some("carol".into()),
            first_name: "Carol".into(),
            last_name: None,
        })
        .await
        .unwrap();

        let m = message(
            "спасибо @carol",
            None,
            vec![Entity {
                kind: EntityKind::Mention,
                offset: 8,
                length: 6,
            }],
        );
        assert_eq!(resolve_target(&m, &db).await.unwrap().unwrap().id, 9);

        let unknown = message(
            "спасибо @nobody",
            None,
            vec![Entity {
                kind: EntityKind::Mention,
                offset: 8,
                length: 7,
            }],
        );
        assert!(resolve_target(&unknown, &db).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn self_thanks_resolve_to_nobody() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let m = message("спасибо", Some(user(7, "anna")), vec![]);
        assert!(resolve_target(&m, &db).await.unwrap().is_none());
    }
}
