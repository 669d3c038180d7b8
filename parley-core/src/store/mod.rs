//! Persistence for users, chats and exchanges.
//!
//! Two backends implement the store traits:
//! - **Postgres** (`PgStore`), the production backend
//! - **Memory** (`MemoryStore`), for local runs without a database and for tests

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{DatabaseConfig, StoreBackend};
use crate::error::Result;
use crate::models::{Chat, Exchange, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persists user records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// First user whose user name or email matches either given value.
    async fn find_user_by_identity(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>>;

    /// Fails with `ParleyError::Conflict` when the user name or email is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
}

/// Everything written by one successful prompt turn.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    /// Present when the turn opened a new chat.
    pub new_chat: Option<Chat>,
    /// Replaces the chat summary when present.
    pub summary: Option<String>,
    pub exchange: Exchange,
}

/// Persists chats and their exchanges.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>>;

    /// Chats owned by `owner_id`, newest first.
    async fn list_chats(&self, owner_id: Uuid) -> Result<Vec<Chat>>;

    /// The `limit` most recent exchanges of a chat, in chronological order.
    async fn recent_exchanges(&self, chat_id: Uuid, limit: u32) -> Result<Vec<Exchange>>;

    async fn count_exchanges(&self, chat_id: Uuid) -> Result<u64>;

    /// All exchanges of a chat, oldest first.
    async fn list_exchanges(&self, chat_id: Uuid) -> Result<Vec<Exchange>>;

    /// Writes the new chat, the summary and the exchange together.
    async fn record_turn(&self, turn: &TurnRecord) -> Result<()>;

    /// Deletes the chat and its exchanges if owned by `owner_id`.
    /// Returns whether a chat was removed.
    async fn delete_chat(&self, chat_id: Uuid, owner_id: Uuid) -> Result<bool>;

    /// Short backend description for health reporting.
    async fn health(&self) -> Result<String>;
}

/// Store handles shared by the services.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            credentials: store.clone(),
            conversations: store,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            credentials: store.clone(),
            conversations: store,
        }
    }

    /// Create the configured backend, applying migrations when asked to.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on shutdown");
                Ok(Self::in_memory())
            }
            StoreBackend::Postgres => {
                let pool = crate::db::create_pool(config).await?;
                if config.run_migrations {
                    crate::db::run_migrations(&pool).await?;
                }
                Ok(Self::postgres(PgStore::new(pool)))
            }
        }
    }
}
