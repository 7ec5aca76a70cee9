//! SQLite message storage (feature-gated).

use async_trait::async_trait;
use chat_relay_core::{Message, MessageStore, Role, StorageError};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, created_at, id);";

fn internal(e: &sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// SQLite storage implementation.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and make sure the schema exists.
    ///
    /// # Errors
    /// Returns error if database connection or migration fails.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            // In-memory databases exist per connection.
            .max_connections(if database_url.contains(":memory:") { 1 } else { 5 })
            .connect(database_url)
            .await
            .map_err(|e| internal(&e))?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool.
    ///
    /// # Errors
    /// Returns error if the schema cannot be created.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| internal(&e))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(
        &self,
        session: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, StorageError> {
        let msg = Message::now(role, content);
        sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session)
        .bind(role.as_str())
        .bind(content)
        .bind(msg.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| internal(&e))?;
        Ok(msg)
    }

    async fn select_ordered_by_time(&self, session: &str) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM messages \
             WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(session)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| internal(&e))?;

        rows.iter()
            .map(|row| {
                let role: String = row.try_get("role").map_err(|e| internal(&e))?;
                let role = Role::parse(&role)
                    .ok_or_else(|| StorageError::Internal(format!("unknown role: {role}")))?;
                let millis: i64 = row.try_get("created_at").map_err(|e| internal(&e))?;
                Ok(Message {
                    role,
                    content: row.try_get("content").map_err(|e| internal(&e))?,
                    timestamp: DateTime::<Utc>::from_timestamp_millis(millis)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}
