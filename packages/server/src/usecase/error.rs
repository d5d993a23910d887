//! Use case level errors.

use thiserror::Error;

use crate::domain::{AuthError, CollaboratorError, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{0}' belongs to another user")]
    NotOwned(String),

    #[error("session '{0}' has expired")]
    Expired(String),

    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    #[error("too many sessions created, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("session storage failed: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for SessionError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::SessionNotFound(id) => SessionError::NotFound(id),
            RepositoryError::SessionAlreadyExists(id) => SessionError::AlreadyExists(id),
            other => SessionError::Repository(other),
        }
    }
}

/// Failure of a chat exchange, whichever transport carried it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error("{0}")]
    Validation(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Session(SessionError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl From<SessionError> for ChatError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::RateLimited { retry_after_secs } => {
                ChatError::RateLimited { retry_after_secs }
            }
            other => ChatError::Session(other),
        }
    }
}

/// Message persistence is a collaborator like the responder
impl From<RepositoryError> for ChatError {
    fn from(e: RepositoryError) -> Self {
        ChatError::Collaborator(CollaboratorError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_rate_limit_surfaces_as_rate_limit() {
        // テスト項目: セッション作成のレート制限はチャットのレート制限エラーとして扱われる
        let err: ChatError = SessionError::RateLimited {
            retry_after_secs: 7,
        }
        .into();

        assert_eq!(err, ChatError::RateLimited { retry_after_secs: 7 });
    }

    #[test]
    fn test_repository_errors_map_to_session_errors() {
        // テスト項目: リポジトリエラーが対応するセッションエラーに変換される
        assert_eq!(
            SessionError::from(RepositoryError::SessionNotFound("s1".to_string())),
            SessionError::NotFound("s1".to_string())
        );
        assert!(matches!(
            SessionError::from(RepositoryError::Storage("disk".to_string())),
            SessionError::Repository(_)
        ));
    }
}
