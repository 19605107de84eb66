use crate::models::{OutboxMessage, Qos};
use sqlx::SqlitePool;

const SCHEMA_SQL: &str = include_str!("../schema.sql");

/// Durable queue of messages waiting for confirmed delivery.
///
/// Cloning is cheap and every clone shares the same pool. Each call is a
/// single statement, so SQLite commits it atomically and a concurrent
/// `list_pending` never observes a half-applied `mark_sent`.
#[derive(Debug, Clone)]
pub struct OutboxStore {
    pool: SqlitePool,
}

impl OutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `messages` table if it does not exist yet.
    pub async fn init(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Appends a new unsent message and returns its id.
    pub async fn enqueue(&self, topic: &str, payload: &str, qos: Qos) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (topic, payload, qos, sent)
            VALUES (?, ?, ?, 0)
            "#,
        )
            .bind(topic)
            .bind(payload)
            .bind(qos.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Marks a message as delivered. Re-marking or unknown ids are no-ops.
    pub async fn mark_sent(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE messages
            SET sent = 1
            WHERE id = ? AND sent = 0
            "#,
        )
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Fetches every unsent message, oldest id first.
    pub async fn list_pending(&self) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        sqlx::query_as::<_, OutboxMessage>(
            r#"
            SELECT id, topic, payload, qos, sent
            FROM messages
            WHERE sent = 0
            ORDER BY id
            "#,
        )
            .fetch_all(&self.pool)
            .await
    }
}
