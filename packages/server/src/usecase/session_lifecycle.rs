//! UseCase: chat session lifecycle
//!
//! Sessions are transport independent. Both transports resolve the session a
//! message belongs to through [`SessionLifecycleUseCase::get_or_create`]: a
//! supplied id is validated against the caller and, when it cannot be used,
//! a fresh session is created instead of failing the request.
//!
//! Expiry is fixed at creation (`ChatSession::expires_at`); activity only
//! moves `last_activity`.

use std::sync::Arc;
use std::time::Duration;

use parley_shared::time::{Clock, duration_to_millis};

use crate::domain::{
    AuditEvent, ChatSession, ClientContext, ContentSecurity, MessageRepository, RateLimitAction,
    RateLimiter, SessionFilter, SessionId, SessionRepository, SessionStatus, Timestamp, UserId,
    service::admit,
};

use super::error::SessionError;

/// Session a message was routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub session: ChatSession,
    /// Whether the session was created by this resolution
    pub created: bool,
}

/// セッションのライフサイクル管理のユースケース
pub struct SessionLifecycleUseCase {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    rate_limiter: Arc<dyn RateLimiter>,
    security: Arc<dyn ContentSecurity>,
    clock: Arc<dyn Clock>,
    ttl_millis: i64,
}

impl SessionLifecycleUseCase {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        rate_limiter: Arc<dyn RateLimiter>,
        security: Arc<dyn ContentSecurity>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            messages,
            rate_limiter,
            security,
            clock,
            ttl_millis: duration_to_millis(ttl),
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Create a session owned by `owner`.
    ///
    /// Uses `requested_id` when given, otherwise synthesizes one. Subject to
    /// the per-user session-creation rate limit.
    pub async fn create_session(
        &self,
        owner: &UserId,
        requested_id: Option<SessionId>,
        context: ClientContext,
    ) -> Result<ChatSession, SessionError> {
        let decision = admit(
            self.rate_limiter.as_ref(),
            RateLimitAction::SessionCreate,
            owner.as_str(),
        );
        if !decision.allowed {
            self.security
                .audit(AuditEvent::RateLimited {
                    user_id: owner.clone(),
                    action: RateLimitAction::SessionCreate,
                })
                .await;
            return Err(SessionError::RateLimited {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        let id = requested_id.unwrap_or_else(SessionId::generate);
        let session = ChatSession::new(id, owner.clone(), context, self.now(), self.ttl_millis);
        self.sessions.create(session.clone()).await?;

        self.security
            .audit(AuditEvent::SessionCreated {
                user_id: owner.clone(),
                session_id: session.id.clone(),
            })
            .await;
        tracing::info!("Session '{}' created for user '{}'", session.id, owner);
        Ok(session)
    }

    /// Return the session if `user` owns it and it is still usable.
    ///
    /// A session found past its deadline is marked expired as a side effect.
    pub async fn validate_session(
        &self,
        id: &SessionId,
        user: &UserId,
    ) -> Result<ChatSession, SessionError> {
        let session = self.get_session(id, user).await?;
        if session.status == SessionStatus::Terminated {
            return Err(SessionError::NotFound(id.to_string()));
        }

        let now = self.now();
        if session.is_expired(now) {
            if session.status == SessionStatus::Active {
                self.sessions
                    .modify(
                        id,
                        Box::new(move |s: &mut ChatSession| {
                            if s.status == SessionStatus::Active {
                                s.mark_expired(now);
                            }
                        }),
                    )
                    .await?;
            }
            return Err(SessionError::Expired(id.to_string()));
        }
        Ok(session)
    }

    /// Look up a session owned by `user`, whatever its status
    pub async fn get_session(
        &self,
        id: &SessionId,
        user: &UserId,
    ) -> Result<ChatSession, SessionError> {
        let session = self
            .sessions
            .get(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if !session.is_owned_by(user) {
            return Err(SessionError::NotOwned(id.to_string()));
        }
        Ok(session)
    }

    /// Resolve the session a request refers to, creating one when needed.
    ///
    /// A blank, malformed, unknown, foreign or expired id falls back to a new
    /// session with a server-generated id; the rejected id is never reused.
    /// Only storage failures and the creation rate limit surface as errors.
    pub async fn get_or_create(
        &self,
        owner: &UserId,
        requested: &str,
        context: Option<ClientContext>,
    ) -> Result<ResolvedSession, SessionError> {
        let requested = requested.trim();
        if !requested.is_empty() {
            match SessionId::new(requested.to_string()) {
                Ok(id) => match self.validate_session(&id, owner).await {
                    Ok(session) => {
                        let session = match context {
                            Some(context) => self.merge_context(&id, context).await?,
                            None => session,
                        };
                        return Ok(ResolvedSession {
                            session,
                            created: false,
                        });
                    }
                    Err(SessionError::Repository(e)) => return Err(SessionError::Repository(e)),
                    Err(e) => {
                        tracing::debug!(
                            "Session '{}' unusable for user '{}' ({}), creating a new one",
                            requested,
                            owner,
                            e
                        );
                    }
                },
                Err(e) => {
                    tracing::debug!("Ignoring malformed session id '{}': {}", requested, e);
                }
            }
        }

        // The fallback counts against the SessionCreate limit and may return 429
        let session = self
            .create_session(owner, None, context.unwrap_or_default())
            .await?;
        Ok(ResolvedSession {
            session,
            created: true,
        })
    }

    /// Merge new context fields into an owned, usable session
    pub async fn update_context(
        &self,
        id: &SessionId,
        user: &UserId,
        context: ClientContext,
    ) -> Result<ChatSession, SessionError> {
        self.validate_session(id, user).await?;
        self.merge_context(id, context).await
    }

    async fn merge_context(
        &self,
        id: &SessionId,
        context: ClientContext,
    ) -> Result<ChatSession, SessionError> {
        let now = self.now();
        self.sessions
            .modify(
                id,
                Box::new(move |s: &mut ChatSession| s.update_context(context, now)),
            )
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Delete a session and its message history
    pub async fn delete_session(&self, id: &SessionId, user: &UserId) -> Result<(), SessionError> {
        self.get_session(id, user).await?;
        self.sessions.delete(id).await?;
        let removed = self.messages.delete_session(id).await?;

        self.security
            .audit(AuditEvent::SessionDeleted {
                user_id: user.clone(),
                session_id: id.clone(),
            })
            .await;
        tracing::info!("Session '{}' deleted ({} messages removed)", id, removed);
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<ChatSession>, SessionError> {
        Ok(self.sessions.list(filter).await?)
    }

    /// Record activity on a session; returns the updated session
    pub async fn touch(&self, id: &SessionId) -> Result<ChatSession, SessionError> {
        let now = self.now();
        self.sessions
            .modify(id, Box::new(move |s: &mut ChatSession| s.touch(now)))
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Delete every expired or terminated session; returns how many were reaped
    pub async fn reap_expired(&self) -> Result<usize, SessionError> {
        let now = self.now();
        let sessions = self.sessions.list(&SessionFilter::default()).await?;

        let mut reaped = 0;
        for session in sessions
            .into_iter()
            .filter(|s| s.status == SessionStatus::Terminated || s.is_expired(now))
        {
            if self.sessions.delete(&session.id).await? {
                self.messages.delete_session(&session.id).await?;
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::info!("Reaped {} expired sessions", reaped);
        }
        Ok(reaped)
    }

    /// Reap expired sessions every `interval` until the process stops
    pub async fn run_reaper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.reap_expired().await {
                tracing::warn!("Session reaper failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RateLimitError, service::MockRateLimiter};
    use crate::infrastructure::{
        rate_limit::{RateLimitPolicies, RateLimitPolicy, SlidingWindowRateLimiter},
        repository::{InMemoryMessageRepository, InMemorySessionRepository},
        security::BasicContentSecurity,
    };
    use parley_shared::time::FixedClock;

    const TTL: Duration = Duration::from_secs(3600);

    struct Fixture {
        usecase: SessionLifecycleUseCase,
        sessions: Arc<InMemorySessionRepository>,
        clock: Arc<FixedClock>,
    }

    fn fixture_with_limiter(
        rate_limiter: impl FnOnce(Arc<FixedClock>) -> Arc<dyn RateLimiter>,
    ) -> Fixture {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let sessions = Arc::new(InMemorySessionRepository::new());
        let usecase = SessionLifecycleUseCase::new(
            sessions.clone(),
            Arc::new(InMemoryMessageRepository::new()),
            rate_limiter(clock.clone()),
            Arc::new(BasicContentSecurity::new(4000)),
            clock.clone(),
            TTL,
        );
        Fixture {
            usecase,
            sessions,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_limiter(|clock| {
            Arc::new(SlidingWindowRateLimiter::new(
                RateLimitPolicies::default(),
                clock,
            ))
        })
    }

    fn user(name: &str) -> UserId {
        UserId::new(name.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_with_blank_id_creates_session() {
        // テスト項目: セッション ID が空の場合、新しいセッションが作成される
        // given (前提条件):
        let f = fixture();
        let alice = user("alice");

        // when (操作):
        let resolved = f.usecase.get_or_create(&alice, "", None).await.unwrap();

        // then (期待する結果):
        assert!(resolved.created);
        assert!(resolved.session.is_owned_by(&alice));
        assert!(!resolved.session.id.as_str().is_empty());
        assert!(f.sessions.get(&resolved.session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_owned_session() {
        // テスト項目: 自分のセッション ID を指定した場合は既存セッションが使われる
        let f = fixture();
        let alice = user("alice");
        let first = f.usecase.get_or_create(&alice, "", None).await.unwrap();

        let second = f
            .usecase
            .get_or_create(&alice, first.session.id.as_str(), None)
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.session.id, first.session.id);
    }

    #[tokio::test]
    async fn test_get_or_create_never_reuses_rejected_ids() {
        // テスト項目: 未知・他人・不正形式の ID は再利用されず、呼び出し元所有の新規セッションになる
        // given (前提条件): bob のセッションが存在する
        let f = fixture();
        let alice = user("alice");
        let bob_session = f
            .usecase
            .create_session(&user("bob"), None, ClientContext::default())
            .await
            .unwrap();

        for requested in ["chat_unknown", bob_session.id.as_str(), "bad id!"] {
            // when (操作):
            let resolved = f
                .usecase
                .get_or_create(&alice, requested, None)
                .await
                .unwrap();

            // then (期待する結果):
            assert!(resolved.created);
            assert_ne!(resolved.session.id.as_str(), requested);
            assert!(resolved.session.is_owned_by(&alice));
        }
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced_and_marked() {
        // テスト項目: 期限切れのセッションは expired に遷移し、新しいセッションに置き換えられる
        // given (前提条件):
        let f = fixture();
        let alice = user("alice");
        let original = f.usecase.get_or_create(&alice, "", None).await.unwrap();

        // when (操作): 有効期限を過ぎてから同じ ID を指定する
        f.clock.advance(TTL);
        let resolved = f
            .usecase
            .get_or_create(&alice, original.session.id.as_str(), None)
            .await
            .unwrap();

        // then (期待する結果):
        assert!(resolved.created);
        let stored = f.sessions.get(&original.session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_activity_does_not_extend_expiry() {
        // テスト項目: touch は最終アクティビティのみ更新し、有効期限は延長しない
        let f = fixture();
        let session = f
            .usecase
            .create_session(&user("alice"), None, ClientContext::default())
            .await
            .unwrap();

        f.clock.advance(Duration::from_secs(60));
        let touched = f.usecase.touch(&session.id).await.unwrap();

        assert_eq!(touched.last_activity.value(), 1_060_000);
        assert_eq!(touched.expires_at, session.expires_at);
    }

    #[tokio::test]
    async fn test_validate_session_rejects_other_owner() {
        // テスト項目: 他ユーザーのセッション検証は NotOwned になる
        let f = fixture();
        let session = f
            .usecase
            .create_session(&user("alice"), None, ClientContext::default())
            .await
            .unwrap();

        let result = f.usecase.validate_session(&session.id, &user("bob")).await;

        assert_eq!(result, Err(SessionError::NotOwned(session.id.to_string())));
    }

    #[tokio::test]
    async fn test_update_context_merges_fields() {
        // テスト項目: コンテキスト更新は指定されたフィールドのみ上書きする
        let f = fixture();
        let alice = user("alice");
        let session = f
            .usecase
            .create_session(
                &alice,
                None,
                ClientContext {
                    client_name: Some("Ada".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = f
            .usecase
            .update_context(
                &session.id,
                &alice,
                ClientContext {
                    company: Some("Analytical Engines".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.context.client_name.as_deref(), Some("Ada"));
        assert_eq!(
            updated.context.company.as_deref(),
            Some("Analytical Engines")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_context_updates_are_not_lost() {
        // テスト項目: 同じセッションへの並行したコンテキスト更新と touch で、どの更新も失われない
        // given (前提条件):
        let f = fixture();
        let usecase = Arc::new(f.usecase);
        let alice = user("alice");
        let setters: [fn(&mut ClientContext); 5] = [
            |c| c.client_name = Some("Ada".to_string()),
            |c| c.company = Some("Analytical Engines".to_string()),
            |c| c.email = Some("ada@example.com".to_string()),
            |c| c.meeting_topic = Some("Difference engine".to_string()),
            |c| c.notes = Some("Prefers mornings".to_string()),
        ];

        for _ in 0..20 {
            let session = usecase
                .create_session(&alice, None, ClientContext::default())
                .await
                .unwrap();

            // when (操作):
            let mut tasks = Vec::new();
            for set in setters {
                let update_usecase = usecase.clone();
                let id = session.id.clone();
                let alice = alice.clone();
                tasks.push(tokio::spawn(async move {
                    let mut context = ClientContext::default();
                    set(&mut context);
                    update_usecase.update_context(&id, &alice, context).await.unwrap();
                }));
                let touch_usecase = usecase.clone();
                let id = session.id.clone();
                tasks.push(tokio::spawn(async move {
                    touch_usecase.touch(&id).await.unwrap();
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            // then (期待する結果):
            let stored = f.sessions.get(&session.id).await.unwrap().unwrap();
            let mut expected = ClientContext::default();
            for set in setters {
                set(&mut expected);
            }
            assert_eq!(stored.context, expected);
        }
    }

    #[tokio::test]
    async fn test_delete_session_requires_owner() {
        // テスト項目: セッション削除は所有者のみ可能で、削除後は見つからない
        let f = fixture();
        let alice = user("alice");
        let session = f
            .usecase
            .create_session(&alice, None, ClientContext::default())
            .await
            .unwrap();

        assert!(matches!(
            f.usecase.delete_session(&session.id, &user("bob")).await,
            Err(SessionError::NotOwned(_))
        ));
        assert!(f.usecase.delete_session(&session.id, &alice).await.is_ok());
        assert!(matches!(
            f.usecase.validate_session(&session.id, &alice).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_explicit_duplicate_id_is_rejected() {
        // テスト項目: 既存と同じ ID を明示して作成すると AlreadyExists になる
        let f = fixture();
        let alice = user("alice");
        let id = SessionId::new("chat_fixed".to_string()).unwrap();
        f.usecase
            .create_session(&alice, Some(id.clone()), ClientContext::default())
            .await
            .unwrap();

        let result = f
            .usecase
            .create_session(&alice, Some(id), ClientContext::default())
            .await;

        assert_eq!(
            result,
            Err(SessionError::AlreadyExists("chat_fixed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_session_creation_is_rate_limited() {
        // テスト項目: セッション作成数が上限を超えると RateLimited になる
        // given (前提条件): 1 分あたり 2 件まで
        let f = fixture_with_limiter(|clock| {
            Arc::new(SlidingWindowRateLimiter::new(
                RateLimitPolicies {
                    session_create: RateLimitPolicy::per_minute(2),
                    ..Default::default()
                },
                clock,
            ))
        });
        let alice = user("alice");

        // when (操作):
        for _ in 0..2 {
            f.usecase.get_or_create(&alice, "", None).await.unwrap();
        }
        let third = f.usecase.get_or_create(&alice, "", None).await;

        // then (期待する結果):
        assert!(matches!(
            third,
            Err(SessionError::RateLimited { retry_after_secs }) if retry_after_secs > 0
        ));
    }

    #[tokio::test]
    async fn test_fallback_creation_is_rate_limited() {
        // テスト項目: 使えない ID からのフォールバック作成も作成上限の対象となる
        // given (前提条件): 1 分あたり 1 件まで、1 件作成済み
        let f = fixture_with_limiter(|clock| {
            Arc::new(SlidingWindowRateLimiter::new(
                RateLimitPolicies {
                    session_create: RateLimitPolicy::per_minute(1),
                    ..Default::default()
                },
                clock,
            ))
        });
        let alice = user("alice");
        let first = f.usecase.get_or_create(&alice, "", None).await.unwrap();

        // when (操作): 既存セッションの再利用と、未知の ID の解決
        let reused = f
            .usecase
            .get_or_create(&alice, first.session.id.as_str(), None)
            .await;
        let unknown = f.usecase.get_or_create(&alice, "chat_unknown", None).await;

        // then (期待する結果): 再利用は上限に関係なく成功し、フォールバックは 429 相当
        assert!(reused.is_ok_and(|r| !r.created));
        assert!(matches!(unknown, Err(SessionError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_limiter_failure_allows_creation() {
        // テスト項目: レートリミッタが失敗した場合はフェイルオープンで作成を許可する
        let f = fixture_with_limiter(|_clock| {
            let mut limiter = MockRateLimiter::new();
            limiter.expect_check().returning(|action, subject| {
                Err(RateLimitError::InvalidPolicy {
                    key: action.key(subject),
                    reason: "window must be positive",
                })
            });
            Arc::new(limiter)
        });

        let resolved = f.usecase.get_or_create(&user("alice"), "", None).await;

        assert!(resolved.is_ok_and(|r| r.created));
    }

    #[tokio::test]
    async fn test_reap_expired_removes_only_expired_sessions() {
        // テスト項目: 期限切れのセッションのみ削除される
        // given (前提条件):
        let f = fixture();
        let alice = user("alice");
        let old = f
            .usecase
            .create_session(&alice, None, ClientContext::default())
            .await
            .unwrap();
        f.clock.advance(Duration::from_secs(1800));
        let fresh = f
            .usecase
            .create_session(&alice, None, ClientContext::default())
            .await
            .unwrap();

        // when (操作): 最初のセッションだけが期限切れになる時刻まで進める
        f.clock.advance(Duration::from_secs(1800));
        let reaped = f.usecase.reap_expired().await.unwrap();

        // then (期待する結果):
        assert_eq!(reaped, 1);
        assert!(f.sessions.get(&old.id).await.unwrap().is_none());
        assert!(f.sessions.get(&fresh.id).await.unwrap().is_some());
    }
}
