//! In-memory session repository.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    ChatSession, RepositoryError, SessionFilter, SessionId, SessionRepository, SessionUpdate,
};

/// `SessionRepository` keeping sessions in a `HashMap`
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<SessionId, ChatSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: ChatSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(RepositoryError::SessionAlreadyExists(
                session.id.into_string(),
            ));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<ChatSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn update(&self, session: ChatSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session;
                Ok(())
            }
            None => Err(RepositoryError::SessionNotFound(session.id.into_string())),
        }
    }

    async fn modify(
        &self,
        id: &SessionId,
        f: SessionUpdate,
    ) -> Result<Option<ChatSession>, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(id).map(|stored| {
            f(stored);
            stored.clone()
        }))
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(id).is_some())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<ChatSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<ChatSession> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();

        // Newest activity first, id as tie-breaker for a stable order
        matching.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }
}
