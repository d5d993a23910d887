//! Server state shared by every handler.

use std::sync::Arc;

use parley_shared::time::Clock;

use crate::{
    config::TransportConfig,
    domain::{
        ChatResponder, ContentSecurity, MessageRepository, MetricsSink, RateLimiter,
        SessionRepository, TokenValidator,
    },
    infrastructure::{
        connection::{ConnectionRegistry, ReliableDelivery},
        metrics::InMemoryMetrics,
        rate_limit::SlidingWindowRateLimiter,
        repository::{InMemoryMessageRepository, InMemorySessionRepository},
        responder::EchoResponder,
        security::BasicContentSecurity,
    },
    usecase::{GetMessagesUseCase, SendChatMessageUseCase, SessionLifecycleUseCase},
};

use super::handler::MessageRouter;

/// External services the transport depends on
pub struct Collaborators {
    pub token_validator: Arc<dyn TokenValidator>,
    pub session_repository: Arc<dyn SessionRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub content_security: Arc<dyn ContentSecurity>,
    pub responder: Arc<dyn ChatResponder>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Process-local implementations of every collaborator
    pub fn in_memory(
        config: &TransportConfig,
        token_validator: Arc<dyn TokenValidator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token_validator,
            session_repository: Arc::new(InMemorySessionRepository::new()),
            message_repository: Arc::new(InMemoryMessageRepository::new()),
            content_security: Arc::new(BasicContentSecurity::new(config.max_content_length)),
            responder: Arc::new(EchoResponder::new()),
            rate_limiter: Arc::new(SlidingWindowRateLimiter::new(
                config.rate_limits,
                clock.clone(),
            )),
            metrics: Arc::new(InMemoryMetrics::new()),
            clock,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: TransportConfig,
    pub clock: Arc<dyn Clock>,
    pub token_validator: Arc<dyn TokenValidator>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub metrics: Arc<dyn MetricsSink>,
    /// Live socket connections of this server instance
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: Arc<ReliableDelivery>,
    pub router: Arc<MessageRouter>,
    pub session_lifecycle: Arc<SessionLifecycleUseCase>,
    pub send_message_usecase: Arc<SendChatMessageUseCase>,
    pub get_messages_usecase: Arc<GetMessagesUseCase>,
}

impl AppState {
    pub fn new(config: TransportConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            token_validator,
            session_repository,
            message_repository,
            content_security,
            responder,
            rate_limiter,
            metrics,
            clock,
        } = collaborators;

        let registry = Arc::new(ConnectionRegistry::new(metrics.clone()));
        let delivery = Arc::new(ReliableDelivery::new(
            config.delivery,
            metrics.clone(),
            clock.clone(),
        ));

        let session_lifecycle = Arc::new(SessionLifecycleUseCase::new(
            session_repository,
            message_repository.clone(),
            rate_limiter.clone(),
            content_security.clone(),
            clock.clone(),
            config.session_ttl,
        ));
        let send_message_usecase = Arc::new(SendChatMessageUseCase::new(
            session_lifecycle.clone(),
            message_repository.clone(),
            content_security,
            rate_limiter.clone(),
            responder,
            clock.clone(),
        ));
        let get_messages_usecase = Arc::new(GetMessagesUseCase::new(
            session_lifecycle.clone(),
            message_repository,
        ));
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            delivery.clone(),
            send_message_usecase.clone(),
            metrics.clone(),
            clock.clone(),
        ));

        Self {
            config,
            clock,
            token_validator,
            rate_limiter,
            metrics,
            registry,
            delivery,
            router,
            session_lifecycle,
            send_message_usecase,
            get_messages_usecase,
        }
    }
}
