//! Domain layer: value objects, entities and the interfaces the core depends on.
//!
//! The traits in [`repository`] and [`service`] are implemented by the
//! infrastructure layer (dependency inversion); use cases and transports only
//! see these abstractions.

pub mod entity;
pub mod error;
pub mod repository;
pub mod service;
pub mod value_object;

pub use entity::{
    ChatMessage, ChatSession, ClientContext, MessageRole, MessageStatus, SessionFilter,
    SessionStatus,
};
pub use error::{RepositoryError, ValueObjectError};
pub use repository::{MessageRepository, SessionRepository, SessionUpdate};
pub use service::{
    AuditEvent, AuthContext, AuthError, ChatReply, ChatResponder, CollaboratorError,
    ContentSecurity, Counter, MetricsSink, MetricsSnapshot, RateLimitAction, RateLimitDecision,
    RateLimitError, RateLimiter, SecurityViolation, TokenValidator,
};
pub use value_object::{
    ConnectionId, MAX_MESSAGE_CONTENT_LENGTH, MessageContent, MessageId, SessionId, Timestamp,
    UserId,
};
