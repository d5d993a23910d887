//! Repository trait definitions.
//!
//! The domain layer declares the storage interfaces it needs; the
//! infrastructure layer provides the implementations (dependency inversion).

use async_trait::async_trait;

use super::{
    ChatMessage, ChatSession, RepositoryError, SessionFilter, SessionId, Timestamp,
};

/// In-place change applied by [`SessionRepository::modify`]
pub type SessionUpdate = Box<dyn FnOnce(&mut ChatSession) + Send>;

/// Session persistence service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a new session; fails if the id is already taken
    async fn create(&self, session: ChatSession) -> Result<(), RepositoryError>;

    async fn get(&self, id: &SessionId) -> Result<Option<ChatSession>, RepositoryError>;

    /// Replace a stored session
    async fn update(&self, session: ChatSession) -> Result<(), RepositoryError>;

    /// Apply `f` to the stored session while holding it exclusively.
    ///
    /// Returns the updated session, or `None` when the id is unknown.
    async fn modify(
        &self,
        id: &SessionId,
        f: SessionUpdate,
    ) -> Result<Option<ChatSession>, RepositoryError>;

    /// Returns whether a session was removed
    async fn delete(&self, id: &SessionId) -> Result<bool, RepositoryError>;

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<ChatSession>, RepositoryError>;
}

/// Message history storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: ChatMessage) -> Result<(), RepositoryError>;

    /// Messages of a session in creation order, newer than `since` when given
    async fn list(
        &self,
        session_id: &SessionId,
        since: Option<Timestamp>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    async fn count(&self, session_id: &SessionId) -> Result<usize, RepositoryError>;

    /// Drop the whole history of a session; returns the number of messages removed
    async fn delete_session(&self, session_id: &SessionId) -> Result<usize, RepositoryError>;
}
