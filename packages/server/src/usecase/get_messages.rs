//! UseCase: message retrieval for the polling transport
//!
//! Supports conditional retrieval. The validators of a session are derived
//! from its `last_activity`, so any stored message (which touches the
//! session) invalidates cached pages.

use std::sync::Arc;

use parley_shared::time::timestamp_to_http_date;
use sha2::{Digest, Sha256};

use crate::domain::{ChatMessage, ChatSession, MessageRepository, SessionId, Timestamp, UserId};

use super::{error::ChatError, session_lifecycle::SessionLifecycleUseCase};

/// `ETag` / `Last-Modified` pair of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValidators {
    /// Quoted strong entity tag
    pub etag: String,
    /// Whole seconds since the Unix epoch
    pub last_modified_secs: i64,
}

impl CacheValidators {
    pub fn for_session(session: &ChatSession) -> Self {
        let digest = Sha256::digest(format!(
            "{}:{}",
            session.id,
            session.last_activity.value()
        ));
        Self {
            etag: format!("\"{:x}\"", digest),
            last_modified_secs: session.last_activity.as_secs(),
        }
    }

    /// `Last-Modified` header value
    pub fn last_modified(&self) -> String {
        timestamp_to_http_date(self.last_modified_secs.saturating_mul(1000))
    }

    /// Whether a client holding these request validators is up to date.
    ///
    /// `If-None-Match` takes precedence; `If-Modified-Since` (Unix seconds)
    /// is only consulted when it is absent. HTTP dates carry whole seconds,
    /// so activity later within the second named by `If-Modified-Since`
    /// still compares as current. Only the `ETag` detects it.
    pub fn is_current(&self, if_none_match: Option<&str>, if_modified_since: Option<i64>) -> bool {
        match if_none_match {
            Some(header) => header.split(',').map(str::trim).any(|tag| {
                tag == "*" || tag.strip_prefix("W/").unwrap_or(tag) == self.etag
            }),
            None => if_modified_since.is_some_and(|since| self.last_modified_secs <= since),
        }
    }
}

/// Parameters of a message retrieval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagesQuery {
    pub session_id: String,
    /// Only messages created strictly after this instant
    pub since: Option<Timestamp>,
    pub limit: usize,
    pub offset: usize,
    pub if_none_match: Option<String>,
    /// Unix seconds
    pub if_modified_since: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub session_id: SessionId,
    pub messages: Vec<ChatMessage>,
    /// True iff the page is exactly `limit` long
    pub has_more: bool,
    pub validators: CacheValidators,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagesOutcome {
    NotModified {
        session_id: SessionId,
        validators: CacheValidators,
    },
    Page(MessagePage),
}

/// メッセージ取得のユースケース
pub struct GetMessagesUseCase {
    sessions: Arc<SessionLifecycleUseCase>,
    messages: Arc<dyn MessageRepository>,
}

impl GetMessagesUseCase {
    pub fn new(sessions: Arc<SessionLifecycleUseCase>, messages: Arc<dyn MessageRepository>) -> Self {
        Self { sessions, messages }
    }

    /// Fetch a page of messages, or report that the caller's copy is current.
    ///
    /// An unusable session id resolves to a fresh, empty session whose id is
    /// returned in the page.
    pub async fn execute(
        &self,
        user_id: &UserId,
        query: MessagesQuery,
    ) -> Result<MessagesOutcome, ChatError> {
        let resolved = self
            .sessions
            .get_or_create(user_id, &query.session_id, None)
            .await?;
        let session = resolved.session;
        let validators = CacheValidators::for_session(&session);

        if !resolved.created
            && validators.is_current(query.if_none_match.as_deref(), query.if_modified_since)
        {
            tracing::debug!("Messages of session '{}' not modified", session.id);
            return Ok(MessagesOutcome::NotModified {
                session_id: session.id,
                validators,
            });
        }

        let limit = query.limit.max(1);
        let messages = self
            .messages
            .list(&session.id, query.since, limit, query.offset)
            .await?;
        let has_more = messages.len() == limit;

        Ok(MessagesOutcome::Page(MessagePage {
            session_id: session.id,
            messages,
            has_more,
            validators,
        }))
    }
}
