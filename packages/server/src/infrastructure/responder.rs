//! Echo reply generator.
//!
//! Placeholder for the LLM-backed chat-content service: replies are derived
//! from the incoming text and the session's client context only.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ChatReply, ChatResponder, ChatSession, CollaboratorError};

pub struct EchoResponder {
    delay: Duration,
}

impl EchoResponder {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Simulate backend latency before each reply
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatResponder for EchoResponder {
    async fn respond(
        &self,
        session: &ChatSession,
        content: &str,
    ) -> Result<ChatReply, CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let greeting = match &session.context.client_name {
            Some(name) => format!("Thanks, {}. ", name),
            None => String::new(),
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), "echo".to_string());

        Ok(ChatReply {
            content: format!("{}You said: {}", greeting, content),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClientContext, SessionId, Timestamp, UserId};

    #[tokio::test]
    async fn test_reply_uses_client_name() {
        // テスト項目: クライアント名があれば返信に含まれる
        // given (前提条件):
        let session = ChatSession::new(
            SessionId::generate(),
            UserId::new("alice".to_string()).unwrap(),
            ClientContext {
                client_name: Some("Jordan".to_string()),
                ..Default::default()
            },
            Timestamp::new(0),
            1000,
        );

        // when (操作):
        let reply = EchoResponder::new().respond(&session, "Hello").await.unwrap();

        // then (期待する結果):
        assert_eq!(reply.content, "Thanks, Jordan. You said: Hello");
        assert_eq!(reply.metadata.get("model").map(String::as_str), Some("echo"));
    }
}
