//! Domain entities: chat sessions and chat messages.

use std::collections::BTreeMap;

use super::value_object::{MessageId, SessionId, Timestamp, UserId};

/// Lifecycle state of a chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Active,
    Expired,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "expired" => Some(SessionStatus::Expired),
            "terminated" => Some(SessionStatus::Terminated),
            _ => None,
        }
    }
}

/// Lead / meeting context the consultant assistant works with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub client_name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub meeting_topic: Option<String>,
    pub notes: Option<String>,
}

impl ClientContext {
    /// Overlay the fields set in `other` on top of `self`
    pub fn merge(&mut self, other: ClientContext) {
        if other.client_name.is_some() {
            self.client_name = other.client_name;
        }
        if other.company.is_some() {
            self.company = other.company;
        }
        if other.email.is_some() {
            self.email = other.email;
        }
        if other.meeting_topic.is_some() {
            self.meeting_topic = other.meeting_topic;
        }
        if other.notes.is_some() {
            self.notes = other.notes;
        }
    }
}

/// A logical conversation, independent of the transport carrying it.
///
/// `expires_at` is fixed at creation. Activity only moves `last_activity`,
/// which drives staleness and HTTP cache validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub id: SessionId,
    pub owner: UserId,
    pub context: ClientContext,
    pub status: SessionStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_activity: Timestamp,
    pub expires_at: Timestamp,
}

impl ChatSession {
    /// Create an active session that expires `ttl_millis` after `now`
    pub fn new(
        id: SessionId,
        owner: UserId,
        context: ClientContext,
        now: Timestamp,
        ttl_millis: i64,
    ) -> Self {
        Self {
            id,
            owner,
            context,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            last_activity: now,
            expires_at: now.saturating_add_millis(ttl_millis),
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }

    /// Expired either by status or because the fixed deadline has passed
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == SessionStatus::Expired || now >= self.expires_at
    }

    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.status == SessionStatus::Active && !self.is_expired(now)
    }

    pub fn touch(&mut self, now: Timestamp) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn update_context(&mut self, context: ClientContext, now: Timestamp) {
        self.context.merge(context);
        self.updated_at = now;
        self.touch(now);
    }

    pub fn mark_expired(&mut self, now: Timestamp) {
        self.status = SessionStatus::Expired;
        self.updated_at = now;
    }

    pub fn terminate(&mut self, now: Timestamp) {
        self.status = SessionStatus::Terminated;
        self.updated_at = now;
    }
}

/// Criteria for listing sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub owner: Option<UserId>,
    pub status: Option<SessionStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SessionFilter {
    pub fn matches(&self, session: &ChatSession) -> bool {
        self.owner.as_ref().is_none_or(|owner| &session.owner == owner)
            && self.status.is_none_or(|status| session.status == status)
    }
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// Processing state of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Received,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
        }
    }
}

/// One unit of conversation content; immutable once stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub metadata: BTreeMap<String, String>,
}

impl ChatMessage {
    pub fn new(
        id: MessageId,
        session_id: SessionId,
        role: MessageRole,
        content: String,
        created_at: Timestamp,
    ) -> Self {
        let status = match role {
            MessageRole::User => MessageStatus::Received,
            MessageRole::Assistant | MessageRole::System => MessageStatus::Completed,
        };
        Self {
            id,
            session_id,
            role,
            content,
            status,
            created_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: i64, ttl: i64) -> ChatSession {
        ChatSession::new(
            SessionId::new("s1".to_string()).unwrap(),
            UserId::new("alice".to_string()).unwrap(),
            ClientContext::default(),
            Timestamp::new(now),
            ttl,
        )
    }

    #[test]
    fn test_expiry_is_fixed_at_creation() {
        // テスト項目: アクティビティがあっても有効期限は延長されない
        // given (前提条件):
        let mut session = session(1_000, 10_000);

        // when (操作):
        session.touch(Timestamp::new(9_000));

        // then (期待する結果):
        assert_eq!(session.last_activity, Timestamp::new(9_000));
        assert_eq!(session.expires_at, Timestamp::new(11_000));
        assert!(!session.is_expired(Timestamp::new(10_999)));
        assert!(session.is_expired(Timestamp::new(11_000)));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        // テスト項目: last_activity は過去に戻らない
        let mut session = session(5_000, 10_000);
        session.touch(Timestamp::new(4_000));
        assert_eq!(session.last_activity, Timestamp::new(5_000));
    }

    #[test]
    fn test_update_context_merges_fields() {
        // テスト項目: コンテキスト更新は指定されたフィールドのみ上書きする
        // given (前提条件):
        let mut session = session(0, 10_000);
        session.context.company = Some("Acme".to_string());

        // when (操作):
        session.update_context(
            ClientContext {
                client_name: Some("Jordan".to_string()),
                ..Default::default()
            },
            Timestamp::new(100),
        );

        // then (期待する結果):
        assert_eq!(session.context.client_name.as_deref(), Some("Jordan"));
        assert_eq!(session.context.company.as_deref(), Some("Acme"));
        assert_eq!(session.updated_at, Timestamp::new(100));
    }

    #[test]
    fn test_terminated_session_is_not_usable() {
        // テスト項目: 終了したセッションは利用できない
        let mut session = session(0, 10_000);
        session.terminate(Timestamp::new(1));
        assert!(!session.is_usable(Timestamp::new(2)));
        assert!(!session.is_expired(Timestamp::new(2)));
    }

    #[test]
    fn test_filter_matches_owner_and_status() {
        // テスト項目: フィルタが所有者とステータスで絞り込む
        let session = session(0, 10_000);
        let mine = SessionFilter {
            owner: Some(UserId::new("alice".to_string()).unwrap()),
            status: Some(SessionStatus::Active),
            ..Default::default()
        };
        let theirs = SessionFilter {
            owner: Some(UserId::new("bob".to_string()).unwrap()),
            ..Default::default()
        };
        assert!(mine.matches(&session));
        assert!(!theirs.matches(&session));
    }
}
