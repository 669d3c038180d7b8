use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ConversationStore, CredentialStore, TurnRecord};
use crate::error::{ParleyError, Result};
use crate::models::{Chat, Exchange, User};

const USER_COLUMNS: &str = "id, user_name, email, password_hash, created_at";
const CHAT_COLUMNS: &str = "id, owner_id, title, summary, created_at";
const EXCHANGE_COLUMNS: &str = "id, chat_id, prompt, response, model, created_at";
// Equal created_at values are ordered by `seq`, the insertion-order identity column.

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_identity(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_name = $1 OR email = $2 \
             ORDER BY created_at, id LIMIT 1"
        ))
        .bind(user_name)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO users (id, user_name, email, password_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.user_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                ParleyError::Conflict("Username or Email already exists".to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>> {
        let chat = sqlx::query_as::<_, Chat>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(chat)
    }

    async fn list_chats(&self, owner_id: Uuid) -> Result<Vec<Chat>> {
        let chats = sqlx::query_as::<_, Chat>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE owner_id = $1 \
             ORDER BY created_at DESC, seq DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chats)
    }

    async fn recent_exchanges(&self, chat_id: Uuid, limit: u32) -> Result<Vec<Exchange>> {
        let exchanges = sqlx::query_as::<_, Exchange>(&format!(
            "SELECT {EXCHANGE_COLUMNS} FROM ( \
                 SELECT {EXCHANGE_COLUMNS}, seq FROM exchanges WHERE chat_id = $1 \
                 ORDER BY created_at DESC, seq DESC LIMIT $2 \
             ) recent ORDER BY created_at ASC, seq ASC"
        ))
        .bind(chat_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(exchanges)
    }

    async fn count_exchanges(&self, chat_id: Uuid) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM exchanges WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or_default())
    }

    async fn list_exchanges(&self, chat_id: Uuid) -> Result<Vec<Exchange>> {
        let exchanges = sqlx::query_as::<_, Exchange>(&format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE chat_id = $1 \
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(exchanges)
    }

    async fn record_turn(&self, turn: &TurnRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(chat) = &turn.new_chat {
            sqlx::query(
                "INSERT INTO chats (id, owner_id, title, summary, created_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(chat.id)
            .bind(chat.owner_id)
            .bind(&chat.title)
            .bind(&chat.summary)
            .bind(chat.created_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(summary) = &turn.summary {
            sqlx::query("UPDATE chats SET summary = $1 WHERE id = $2")
                .bind(summary)
                .bind(turn.exchange.chat_id)
                .execute(&mut *tx)
                .await?;
        }

        let exchange = &turn.exchange;
        sqlx::query(
            "INSERT INTO exchanges (id, chat_id, prompt, response, model, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(exchange.id)
        .bind(exchange.chat_id)
        .bind(&exchange.prompt)
        .bind(&exchange.response)
        .bind(exchange.model.as_str())
        .bind(exchange.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_chat(&self, chat_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM exchanges WHERE chat_id IN \
             (SELECT id FROM chats WHERE id = $1 AND owner_id = $2)",
        )
        .bind(chat_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM chats WHERE id = $1 AND owner_id = $2")
            .bind(chat_id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn health(&self) -> Result<String> {
        Ok(crate::db::health_check(&self.pool).await?)
    }
}
