//! In-memory message history.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{ChatMessage, MessageRepository, RepositoryError, SessionId, Timestamp};

/// `MessageRepository` keeping each session's history as an append-only `Vec`
#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<SessionId, Vec<ChatMessage>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: ChatMessage) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list(
        &self,
        session_id: &SessionId,
        since: Option<Timestamp>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let messages = self.messages.read().await;
        let Some(history) = messages.get(session_id) else {
            return Ok(Vec::new());
        };
        Ok(history
            .iter()
            .filter(|m| since.is_none_or(|since| m.created_at > since))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, session_id: &SessionId) -> Result<usize, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.get(session_id).map_or(0, Vec::len))
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<usize, RepositoryError> {
        let mut messages = self.messages.write().await;
        Ok(messages.remove(session_id).map_or(0, |history| history.len()))
    }
}
