//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number, a unique name and SQL. The
//! `_migrations` ledger records applied names; `run_migrations()` applies
//! every migration whose name is not recorded yet, in order. A legacy
//! database (message log present, no ledger) gets its missing columns
//! patched and is seeded at V1 without re-running the initial DDL.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'group',
                username TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT,
                ai_user_info TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_id, timestamp);
        "#,
    },
    Migration {
        version: 2,
        name: "chat_context",
        sql: r#"
            CREATE TABLE IF NOT EXISTS chat_context (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_context_pair
                ON chat_context(chat_id, user_id, timestamp);
        "#,
    },
    Migration {
        version: 3,
        name: "ai_billing",
        sql: r#"
            CREATE TABLE IF NOT EXISTS ai_billing (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ai_billing_chat ON ai_billing(chat_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_ai_billing_user ON ai_billing(user_id, timestamp);
        "#,
    },
    Migration {
        version: 4,
        name: "users_role",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users_role (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (user_id, chat_id)
            );
        "#,
    },
    Migration {
        version: 5,
        name: "mod_thanks",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mod_thanks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                from_user_id INTEGER NOT NULL,
                to_user_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                message_id INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mod_thanks_to ON mod_thanks(chat_id, to_user_id);
        "#,
    },
    Migration {
        version: 6,
        name: "mod_spam_incidents",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mod_spam_incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                message_text TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 7,
        name: "captchas",
        sql: r#"
            CREATE TABLE IF NOT EXISTS captchas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer INTEGER NOT NULL,
                sent_at INTEGER NOT NULL,
                answered_at INTEGER,
                is_correct INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_captchas_pair ON captchas(chat_id, user_id, sent_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    if applied_count(conn).await? == 0 && legacy_tables_exist(conn).await? {
        // Older databases lack the per-user prompt column.
        let _ = conn
            .execute("ALTER TABLE users ADD COLUMN ai_user_info TEXT", ())
            .await;
        seed_version(conn, 1, "initial_schema").await?;
        tracing::info!("Legacy database detected, seeded migration V1");
    }

    for migration in MIGRATIONS {
        if is_applied(conn, migration.name).await? {
            continue;
        }
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        conn.execute_batch(migration.sql).await.map_err(|e| {
            DatabaseError::Migration(format!(
                "Migration V{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        seed_version(conn, migration.version, migration.name).await?;
    }

    let applied = applied_count(conn).await?;
    tracing::info!(applied, "Database migrations complete");
    Ok(())
}

async fn query_count(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration ledger: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration ledger: {e}")))?;

    Ok(row.and_then(|r| r.get::<i64>(0).ok()).unwrap_or(0))
}

async fn applied_count(conn: &Connection) -> Result<i64, DatabaseError> {
    query_count(conn, "SELECT COUNT(*) FROM _migrations", ()).await
}

async fn is_applied(conn: &Connection, name: &str) -> Result<bool, DatabaseError> {
    let count = query_count(
        conn,
        "SELECT COUNT(*) FROM _migrations WHERE name = ?1",
        libsql::params![name],
    )
    .await?;
    Ok(count > 0)
}

/// A message log without a ledger means the schema predates migrations.
async fn legacy_tables_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let count = query_count(
        conn,
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='messages'",
        (),
    )
    .await?;
    Ok(count > 0)
}

/// Record a migration in `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, table: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                libsql::params![table],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get::<i64>(0).unwrap() == 1
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "chats",
            "users",
            "messages",
            "chat_context",
            "ai_billing",
            "users_role",
            "mod_thanks",
            "mod_spam_incidents",
            "captchas",
        ] {
            assert!(table_exists(&conn, table).await, "Table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        assert_eq!(applied_count(&conn).await.unwrap(), MIGRATIONS.len() as i64);
        assert!(is_applied(&conn, "captchas").await.unwrap());
    }

    #[tokio::test]
    async fn legacy_database_gets_ai_info_column() {
        let conn = test_conn().await;
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, first_name TEXT NOT NULL DEFAULT '', last_name TEXT, created_at TEXT NOT NULL DEFAULT (datetime('now')));
             CREATE TABLE messages (id INTEGER PRIMARY KEY AUTOINCREMENT, chat_id INTEGER NOT NULL, user_id INTEGER NOT NULL, message_id INTEGER NOT NULL, text TEXT NOT NULL, timestamp INTEGER NOT NULL);",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO users (id, first_name, ai_user_info) VALUES (1, 'A', 'be nice')",
            (),
        )
        .await
        .unwrap();
        assert!(table_exists(&conn, "captchas").await);
        assert!(is_applied(&conn, "initial_schema").await.unwrap());
    }
}
