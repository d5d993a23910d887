//! UseCase: chat message exchange
//!
//! One user message in, one assistant reply out. The exchange is split into
//! two halves so the socket transport can acknowledge the request between
//! them:
//!
//! - [`SendChatMessageUseCase::prepare`]: content validation, sanitizing,
//!   message rate limit, session resolution, persisting the user message
//! - [`SendChatMessageUseCase::complete`]: reply generation and persisting
//!   the assistant message
//!
//! The polling transport runs both halves through `execute`.

use std::sync::Arc;

use parley_shared::time::Clock;

use crate::domain::{
    AuditEvent, ChatMessage, ChatResponder, ChatSession, ClientContext, ContentSecurity,
    MessageContent, MessageId, MessageRepository, MessageRole, RateLimitAction, RateLimiter,
    Timestamp, UserId, service::admit,
};

use super::{error::ChatError, session_lifecycle::SessionLifecycleUseCase};

/// A validated user message stored in its session, awaiting a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedExchange {
    pub session: ChatSession,
    pub session_created: bool,
    pub user_message: ChatMessage,
}

/// A finished request/reply pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatExchange {
    pub session: ChatSession,
    pub user_message: ChatMessage,
    pub reply: ChatMessage,
}

/// メッセージ送信のユースケース
pub struct SendChatMessageUseCase {
    sessions: Arc<SessionLifecycleUseCase>,
    messages: Arc<dyn MessageRepository>,
    security: Arc<dyn ContentSecurity>,
    rate_limiter: Arc<dyn RateLimiter>,
    responder: Arc<dyn ChatResponder>,
    clock: Arc<dyn Clock>,
}

impl SendChatMessageUseCase {
    pub fn new(
        sessions: Arc<SessionLifecycleUseCase>,
        messages: Arc<dyn MessageRepository>,
        security: Arc<dyn ContentSecurity>,
        rate_limiter: Arc<dyn RateLimiter>,
        responder: Arc<dyn ChatResponder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            messages,
            security,
            rate_limiter,
            responder,
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Validate and store a user message.
    ///
    /// # Arguments
    ///
    /// * `user_id` - authenticated sender
    /// * `session_id` - requested session; blank or unusable ids get a new session
    /// * `content` - raw message text
    /// * `context` - client context to merge into the session, if any
    pub async fn prepare(
        &self,
        user_id: &UserId,
        session_id: &str,
        content: &str,
        context: Option<ClientContext>,
    ) -> Result<PreparedExchange, ChatError> {
        // 1. Content policy
        if let Err(violation) = self.security.validate(content) {
            self.security
                .audit(AuditEvent::MessageRejected {
                    user_id: user_id.clone(),
                    reason: violation.to_string(),
                })
                .await;
            return Err(ChatError::Validation(violation.to_string()));
        }
        // Length and blankness apply to the raw text; escaping may lengthen it
        let content = MessageContent::new(content.to_string())
            .map_err(|e| ChatError::Validation(e.to_string()))?;
        let sanitized = self.security.sanitize(content.as_str());

        // 2. Per-user message rate limit
        let decision = admit(
            self.rate_limiter.as_ref(),
            RateLimitAction::Message,
            user_id.as_str(),
        );
        if !decision.allowed {
            self.security
                .audit(AuditEvent::RateLimited {
                    user_id: user_id.clone(),
                    action: RateLimitAction::Message,
                })
                .await;
            return Err(ChatError::RateLimited {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        // 3. Session resolution (get-or-create)
        let resolved = self
            .sessions
            .get_or_create(user_id, session_id, context)
            .await?;

        // 4. Persist the user message
        let user_message = ChatMessage::new(
            MessageId::generate(),
            resolved.session.id.clone(),
            MessageRole::User,
            sanitized,
            self.now(),
        );
        self.messages.append(user_message.clone()).await?;
        let session = self.touch_or_keep(resolved.session).await;

        self.security
            .audit(AuditEvent::MessageAccepted {
                user_id: user_id.clone(),
                session_id: session.id.clone(),
                length: user_message.content.chars().count(),
            })
            .await;

        Ok(PreparedExchange {
            session,
            session_created: resolved.created,
            user_message,
        })
    }

    /// Generate and store the reply to a prepared message
    pub async fn complete(&self, prepared: PreparedExchange) -> Result<ChatExchange, ChatError> {
        let PreparedExchange {
            session,
            user_message,
            ..
        } = prepared;

        let reply = self
            .responder
            .respond(&session, &user_message.content)
            .await
            .map_err(|e| {
                tracing::warn!("Reply generation failed for session '{}': {}", session.id, e);
                ChatError::Collaborator(e)
            })?;

        let reply = ChatMessage::new(
            MessageId::generate(),
            session.id.clone(),
            MessageRole::Assistant,
            reply.content,
            self.now(),
        )
        .with_metadata(reply.metadata);
        self.messages.append(reply.clone()).await?;
        let session = self.touch_or_keep(session).await;

        Ok(ChatExchange {
            session,
            user_message,
            reply,
        })
    }

    /// Full exchange without an intermediate acknowledgment
    pub async fn execute(
        &self,
        user_id: &UserId,
        session_id: &str,
        content: &str,
        context: Option<ClientContext>,
    ) -> Result<ChatExchange, ChatError> {
        let prepared = self.prepare(user_id, session_id, content, context).await?;
        self.complete(prepared).await
    }

    /// Activity tracking is best effort; the message is already stored
    async fn touch_or_keep(&self, session: ChatSession) -> ChatSession {
        match self.sessions.touch(&session.id).await {
            Ok(touched) => touched,
            Err(e) => {
                tracing::warn!("Failed to record activity on session '{}': {}", session.id, e);
                session
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CollaboratorError, MessageStatus, RateLimitError, SessionId,
        service::{MockChatResponder, MockRateLimiter},
    };
    use crate::infrastructure::{
        rate_limit::{RateLimitPolicies, RateLimitPolicy, SlidingWindowRateLimiter},
        repository::{InMemoryMessageRepository, InMemorySessionRepository},
        responder::EchoResponder,
        security::BasicContentSecurity,
    };
    use crate::usecase::SessionError;
    use parley_shared::time::FixedClock;
    use std::time::Duration;

    struct Fixture {
        usecase: SendChatMessageUseCase,
        messages: Arc<InMemoryMessageRepository>,
    }

    fn fixture_with(
        rate_limiter: Arc<dyn RateLimiter>,
        responder: Arc<dyn ChatResponder>,
    ) -> Fixture {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let messages = Arc::new(InMemoryMessageRepository::new());
        let security = Arc::new(BasicContentSecurity::new(4000));
        let sessions = Arc::new(SessionLifecycleUseCase::new(
            Arc::new(InMemorySessionRepository::new()),
            messages.clone(),
            rate_limiter.clone(),
            security.clone(),
            clock.clone(),
            Duration::from_secs(3600),
        ));
        let usecase = SendChatMessageUseCase::new(
            sessions,
            messages.clone(),
            security,
            rate_limiter,
            responder,
            clock,
        );
        Fixture { usecase, messages }
    }

    fn fixture_with_policies(policies: RateLimitPolicies) -> Fixture {
        let limiter = Arc::new(SlidingWindowRateLimiter::new(
            policies,
            Arc::new(FixedClock::new(1_000_000)),
        ));
        fixture_with(limiter, Arc::new(EchoResponder::new()))
    }

    fn fixture() -> Fixture {
        fixture_with_policies(RateLimitPolicies::default())
    }

    fn alice() -> UserId {
        UserId::new("alice".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_execute_creates_session_and_stores_both_messages() {
        // テスト項目: セッション未指定の送信で新規セッションが作成され、ユーザーと返信の両メッセージが保存される
        // given (前提条件):
        let f = fixture();

        // when (操作):
        let exchange = f
            .usecase
            .execute(&alice(), "", "Hello", None)
            .await
            .unwrap();

        // then (期待する結果):
        assert!(exchange.session.is_owned_by(&alice()));
        assert_eq!(exchange.reply.content, "You said: Hello");
        assert_eq!(exchange.reply.status, MessageStatus::Completed);
        assert_eq!(exchange.reply.metadata.get("model").map(String::as_str), Some("echo"));

        let stored = f
            .messages
            .list(&exchange.session.id, None, 10, 0)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, MessageRole::User);
        assert_eq!(stored[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_escaping_does_not_count_against_length_limit() {
        // テスト項目: 上限ちょうどの長さのメッセージは、エスケープで長くなっても受理される
        // given (前提条件):
        let f = fixture();
        let content = format!("{}a<b>'", "a".repeat(3995));
        assert_eq!(content.chars().count(), 4000);

        // when (操作):
        let exchange = f
            .usecase
            .execute(&alice(), "", &content, None)
            .await
            .unwrap();

        // then (期待する結果):
        assert!(exchange.user_message.content.ends_with("a&lt;b&gt;&#x27;"));
        assert!(exchange.user_message.content.chars().count() > 4000);
    }

    #[tokio::test]
    async fn test_oversize_raw_content_is_rejected() {
        // テスト項目: 生の内容が上限を超える場合は検証エラーになる
        let f = fixture();

        let result = f
            .usecase
            .execute(&alice(), "", &"a".repeat(4001), None)
            .await;

        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_prepare_reuses_session_and_merges_context() {
        // テスト項目: 既存セッションを指定すると同じセッションに保存され、コンテキストが反映される
        let f = fixture();
        let first = f.usecase.execute(&alice(), "", "Hi", None).await.unwrap();

        let prepared = f
            .usecase
            .prepare(
                &alice(),
                first.session.id.as_str(),
                "Again",
                Some(ClientContext {
                    client_name: Some("Ada".to_string()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        let exchange = f.usecase.complete(prepared).await.unwrap();

        assert_eq!(exchange.session.id, first.session.id);
        assert_eq!(exchange.reply.content, "Thanks, Ada. You said: Again");
    }

    #[tokio::test]
    async fn test_content_is_sanitized_before_storage() {
        // テスト項目: 保存前にメッセージ内容がエスケープされる
        let f = fixture();

        let prepared = f
            .usecase
            .prepare(&alice(), "", "  a < b  ", None)
            .await
            .unwrap();

        assert_eq!(prepared.user_message.content, "a &lt; b");
    }

    #[tokio::test]
    async fn test_invalid_content_is_rejected_without_side_effects() {
        // テスト項目: 不正な内容はバリデーションエラーとなり、セッションもメッセージも作成されない
        let f = fixture();

        for content in ["   ", "<script>alert(1)</script>"] {
            let result = f.usecase.prepare(&alice(), "", content, None).await;
            assert!(matches!(result, Err(ChatError::Validation(_))));
        }
        let oversize = "x".repeat(4001);
        assert!(matches!(
            f.usecase.prepare(&alice(), "", &oversize, None).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_message_over_limit_is_rate_limited() {
        // テスト項目: 上限を超えたメッセージは retry_after 付きのレート制限エラーになる
        // given (前提条件): 1 分あたり 3 件まで
        let f = fixture_with_policies(RateLimitPolicies {
            message: RateLimitPolicy::per_minute(3),
            ..Default::default()
        });
        let session = f
            .usecase
            .execute(&alice(), "", "one", None)
            .await
            .unwrap()
            .session;

        // when (操作):
        for content in ["two", "three"] {
            f.usecase
                .execute(&alice(), session.id.as_str(), content, None)
                .await
                .unwrap();
        }
        let fourth = f
            .usecase
            .execute(&alice(), session.id.as_str(), "four", None)
            .await;

        // then (期待する結果):
        assert!(matches!(
            fourth,
            Err(ChatError::RateLimited { retry_after_secs }) if retry_after_secs > 0
        ));
        assert_eq!(f.messages.count(&session.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_limiter_failure_fails_open() {
        // テスト項目: レートリミッタの内部エラー時はリクエストを許可する
        let mut limiter = MockRateLimiter::new();
        limiter.expect_check().returning(|action, subject| {
            Err(RateLimitError::InvalidPolicy {
                key: action.key(subject),
                reason: "window must be positive",
            })
        });
        let f = fixture_with(Arc::new(limiter), Arc::new(EchoResponder::new()));

        let result = f.usecase.execute(&alice(), "", "Hello", None).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_responder_failure_keeps_user_message() {
        // テスト項目: 返信生成の失敗は Collaborator エラーとなり、ユーザーメッセージは保存されたまま
        // given (前提条件):
        let mut responder = MockChatResponder::new();
        responder
            .expect_respond()
            .returning(|_, _| Err(CollaboratorError::Unavailable("backend down".to_string())));
        let limiter = Arc::new(SlidingWindowRateLimiter::new(
            RateLimitPolicies::default(),
            Arc::new(FixedClock::new(0)),
        ));
        let f = fixture_with(limiter, Arc::new(responder));

        // when (操作):
        let prepared = f.usecase.prepare(&alice(), "", "Hello", None).await.unwrap();
        let session_id: SessionId = prepared.session.id.clone();
        let result = f.usecase.complete(prepared).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ChatError::Collaborator(_))));
        assert_eq!(f.messages.count(&session_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_errors_never_reach_the_caller() {
        // テスト項目: 不明なセッション ID を指定しても、エラーにならず新規セッションで処理される
        let f = fixture();

        let result = f
            .usecase
            .execute(&alice(), "chat_does_not_exist", "Hello", None)
            .await;

        assert!(!matches!(result, Err(ChatError::Session(SessionError::NotFound(_)))));
        assert!(result.is_ok_and(|e| e.session.id.as_str() != "chat_does_not_exist"));
    }
}
