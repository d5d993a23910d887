//! Interfaces of the external collaborators the chat core consumes.
//!
//! Authentication, content security, reply generation, rate limiting and
//! metrics are all reached through these traits so the transports never
//! depend on a concrete implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::{ChatSession, SessionId, UserId};

// ========================================
// Authentication
// ========================================

/// Identity resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: UserId,
    pub role: String,
    pub permissions: Vec<String>,
}

impl AuthContext {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "*")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,
}

/// Token-validation service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError>;
}

// ========================================
// Content security
// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    #[error("message content is empty")]
    Empty,

    #[error("message content exceeds {max} characters")]
    TooLong { max: usize },

    #[error("message content contains forbidden characters")]
    ForbiddenCharacters,

    #[error("message content rejected: {0}")]
    Suspicious(String),
}

/// Security-relevant events handed to the audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    MessageAccepted {
        user_id: UserId,
        session_id: SessionId,
        length: usize,
    },
    MessageRejected {
        user_id: UserId,
        reason: String,
    },
    RateLimited {
        user_id: UserId,
        action: RateLimitAction,
    },
    SessionCreated {
        user_id: UserId,
        session_id: SessionId,
    },
    SessionDeleted {
        user_id: UserId,
        session_id: SessionId,
    },
}

/// Content-security service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentSecurity: Send + Sync {
    fn validate(&self, content: &str) -> Result<(), SecurityViolation>;

    fn sanitize(&self, content: &str) -> String;

    async fn audit(&self, event: AuditEvent);
}

// ========================================
// Reply generation
// ========================================

/// Generated reply content
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatReply {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator failed: {0}")]
    Failed(String),
}

/// Chat-content service (an LLM in production)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn respond(
        &self,
        session: &ChatSession,
        content: &str,
    ) -> Result<ChatReply, CollaboratorError>;
}

// ========================================
// Rate limiting
// ========================================

/// Action classes with independent rate-limit buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Connection,
    SessionCreate,
    Message,
    Api,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Connection => "connection",
            RateLimitAction::SessionCreate => "session_create",
            RateLimitAction::Message => "message",
            RateLimitAction::Api => "api",
        }
    }

    /// Bucket key for a subject under this action
    pub fn key(&self, subject: &str) -> String {
        format!("{}:{}", self.as_str(), subject)
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window; zero when allowed
    pub retry_after: Duration,
}

impl RateLimitDecision {
    /// Decision used when the limiter itself failed
    pub fn fail_open() -> Self {
        Self {
            allowed: true,
            remaining: 0,
            retry_after: Duration::ZERO,
        }
    }

    /// `retry_after` rounded up to whole seconds, at least one
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("invalid rate-limit policy for '{key}': {reason}")]
    InvalidPolicy { key: String, reason: &'static str },
}

/// Sliding-window admission control
#[cfg_attr(test, mockall::automock)]
pub trait RateLimiter: Send + Sync {
    /// Check the configured policy of `action` for `subject`
    fn check(
        &self,
        action: RateLimitAction,
        subject: &str,
    ) -> Result<RateLimitDecision, RateLimitError>;

    /// Check an arbitrary bucket with an explicit policy
    fn check_limit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, RateLimitError>;

    /// Generic API-call admission for a subject key
    fn allow(&self, subject_key: &str) -> bool;
}

/// Run a rate-limit check, treating limiter errors as "allowed".
pub fn admit(
    limiter: &dyn RateLimiter,
    action: RateLimitAction,
    subject: &str,
) -> RateLimitDecision {
    match limiter.check(action, subject) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(
                "Rate limiter failed for {} '{}', allowing request: {}",
                action,
                subject,
                e
            );
            RateLimitDecision::fail_open()
        }
    }
}

// ========================================
// Metrics
// ========================================

/// Counters reported to the observability sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    ConnectionsOpened,
    ConnectionsClosed,
    MessagesReceived,
    MessagesSent,
    FramesDropped,
    Retries,
    DeliveryFailures,
    RateLimited,
    ValidationErrors,
    TransportErrors,
    CollaboratorErrors,
}

impl Counter {
    pub const ALL: [Counter; 11] = [
        Counter::ConnectionsOpened,
        Counter::ConnectionsClosed,
        Counter::MessagesReceived,
        Counter::MessagesSent,
        Counter::FramesDropped,
        Counter::Retries,
        Counter::DeliveryFailures,
        Counter::RateLimited,
        Counter::ValidationErrors,
        Counter::TransportErrors,
        Counter::CollaboratorErrors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::ConnectionsOpened => "connections_opened",
            Counter::ConnectionsClosed => "connections_closed",
            Counter::MessagesReceived => "messages_received",
            Counter::MessagesSent => "messages_sent",
            Counter::FramesDropped => "frames_dropped",
            Counter::Retries => "retries",
            Counter::DeliveryFailures => "delivery_failures",
            Counter::RateLimited => "rate_limited",
            Counter::ValidationErrors => "validation_errors",
            Counter::TransportErrors => "transport_errors",
            Counter::CollaboratorErrors => "collaborator_errors",
        }
    }
}

/// Point-in-time view of the metrics sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub active_connections: usize,
    pub counters: BTreeMap<&'static str, u64>,
}

impl MetricsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(counter.as_str()).copied().unwrap_or(0)
    }
}

/// Write-only metrics sink
pub trait MetricsSink: Send + Sync {
    fn increment(&self, counter: Counter);

    fn set_active_connections(&self, count: usize);

    fn snapshot(&self) -> MetricsSnapshot;
}
