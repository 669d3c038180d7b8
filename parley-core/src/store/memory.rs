use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{ConversationStore, CredentialStore, TurnRecord};
use crate::error::{ParleyError, Result};
use crate::models::{Chat, Exchange, User};

/// Process-local store. Insertion order is creation order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<User>,
    chats: Vec<Chat>,
    exchanges: Vec<Exchange>,
}

impl MemoryStore {
    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| ParleyError::Internal("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| ParleyError::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.read()?.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_identity(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        let state = self.read()?;
        Ok(state
            .users
            .iter()
            .find(|u| {
                user_name.is_some_and(|n| n == u.user_name) || email.is_some_and(|e| e == u.email)
            })
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut state = self.write()?;
        if state
            .users
            .iter()
            .any(|u| u.user_name == user.user_name || u.email == user.email)
        {
            return Err(ParleyError::Conflict(
                "Username or Email already exists".to_string(),
            ));
        }
        state.users.push(user.clone());
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>> {
        Ok(self.read()?.chats.iter().find(|c| c.id == chat_id).cloned())
    }

    async fn list_chats(&self, owner_id: Uuid) -> Result<Vec<Chat>> {
        let state = self.read()?;
        Ok(state
            .chats
            .iter()
            .rev()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn recent_exchanges(&self, chat_id: Uuid, limit: u32) -> Result<Vec<Exchange>> {
        let state = self.read()?;
        let mut recent: Vec<Exchange> = state
            .exchanges
            .iter()
            .rev()
            .filter(|e| e.chat_id == chat_id)
            .take(limit as usize)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn count_exchanges(&self, chat_id: Uuid) -> Result<u64> {
        let state = self.read()?;
        Ok(state.exchanges.iter().filter(|e| e.chat_id == chat_id).count() as u64)
    }

    async fn list_exchanges(&self, chat_id: Uuid) -> Result<Vec<Exchange>> {
        let state = self.read()?;
        Ok(state
            .exchanges
            .iter()
            .filter(|e| e.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn record_turn(&self, turn: &TurnRecord) -> Result<()> {
        let mut state = self.write()?;
        let chat_id = turn.exchange.chat_id;

        if let Some(chat) = &turn.new_chat {
            state.chats.push(chat.clone());
        }

        let Some(chat) = state.chats.iter_mut().find(|c| c.id == chat_id) else {
            return Err(ParleyError::NotFound(format!("chat {chat_id} does not exist")));
        };
        if let Some(summary) = &turn.summary {
            chat.summary = Some(summary.clone());
        }

        state.exchanges.push(turn.exchange.clone());
        Ok(())
    }

    async fn delete_chat(&self, chat_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut state = self.write()?;
        let before = state.chats.len();
        state
            .chats
            .retain(|c| !(c.id == chat_id && c.owner_id == owner_id));
        let removed = state.chats.len() < before;
        if removed {
            state.exchanges.retain(|e| e.chat_id != chat_id);
        }
        Ok(removed)
    }

    async fn health(&self) -> Result<String> {
        let state = self.read()?;
        Ok(format!(
            "memory ({} users, {} chats, {} exchanges)",
            state.users.len(),
            state.chats.len(),
            state.exchanges.len()
        ))
    }
}
