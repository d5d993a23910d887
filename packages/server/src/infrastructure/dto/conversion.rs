//! Conversion logic between DTOs and domain entities.

use parley_shared::time::timestamp_to_rfc3339;

use crate::domain::entity::{ChatMessage, ChatSession, ClientContext};
use crate::infrastructure::dto::{http as dto, websocket::Frame, websocket::FrameType};

// ========================================
// DTO → Domain Entity
// ========================================

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<dto::ClientContextDto> for ClientContext {
    fn from(dto: dto::ClientContextDto) -> Self {
        Self {
            client_name: non_blank(dto.client_name),
            company: non_blank(dto.company),
            email: non_blank(dto.email),
            meeting_topic: non_blank(dto.meeting_topic),
            notes: non_blank(dto.notes),
        }
    }
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<ClientContext> for dto::ClientContextDto {
    fn from(model: ClientContext) -> Self {
        Self {
            client_name: model.client_name,
            company: model.company,
            email: model.email,
            meeting_topic: model.meeting_topic,
            notes: model.notes,
        }
    }
}

impl From<ChatMessage> for dto::MessageDto {
    fn from(model: ChatMessage) -> Self {
        Self {
            id: model.id.into_string(),
            session_id: model.session_id.into_string(),
            r#type: model.role.as_str().to_string(),
            content: model.content,
            status: model.status.as_str().to_string(),
            created_at: timestamp_to_rfc3339(model.created_at.value()),
            metadata: model.metadata,
        }
    }
}

impl From<ChatSession> for dto::SessionDto {
    fn from(model: ChatSession) -> Self {
        Self {
            id: model.id.into_string(),
            owner: model.owner.into_string(),
            status: model.status.as_str().to_string(),
            context: model.context.into(),
            created_at: timestamp_to_rfc3339(model.created_at.value()),
            updated_at: timestamp_to_rfc3339(model.updated_at.value()),
            last_activity: timestamp_to_rfc3339(model.last_activity.value()),
            expires_at: timestamp_to_rfc3339(model.expires_at.value()),
        }
    }
}

/// Socket frame for a stored message; the message id doubles as the ack key
impl From<&ChatMessage> for Frame {
    fn from(model: &ChatMessage) -> Self {
        let mut frame = Frame::new(
            FrameType::Message,
            model.session_id.as_str(),
            timestamp_to_rfc3339(model.created_at.value()),
        )
        .with_message_id(model.id.as_str())
        .with_content(model.content.clone())
        .with_meta("role", model.role.as_str());
        for (key, value) in &model.metadata {
            frame = frame.with_meta(key, value.clone());
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, MessageRole, SessionId, Timestamp, UserId};

    fn message() -> ChatMessage {
        ChatMessage::new(
            MessageId::new("m1".to_string()).unwrap(),
            SessionId::new("s1".to_string()).unwrap(),
            MessageRole::Assistant,
            "Hi!".to_string(),
            Timestamp::new(1672531200000),
        )
    }

    #[test]
    fn test_domain_message_to_dto() {
        // テスト項目: ドメインの ChatMessage が DTO に変換される
        // given (前提条件):
        let model = message();

        // when (操作):
        let dto: dto::MessageDto = model.into();

        // then (期待する結果):
        assert_eq!(dto.id, "m1");
        assert_eq!(dto.session_id, "s1");
        assert_eq!(dto.r#type, "assistant");
        assert_eq!(dto.status, "completed");
        assert!(dto.created_at.starts_with("2023-01-01T00:00:00"));
    }

    #[test]
    fn test_domain_message_to_frame() {
        // テスト項目: アシスタントメッセージが ack 必須の message フレームになる
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("model".to_string(), "echo".to_string());
        let model = message().with_metadata(metadata);

        let frame = Frame::from(&model);

        assert_eq!(frame.r#type, FrameType::Message);
        assert_eq!(frame.message_id.as_deref(), Some("m1"));
        assert_eq!(frame.content.as_deref(), Some("Hi!"));
        assert_eq!(frame.meta_str("role"), Some("assistant"));
        assert_eq!(frame.meta_str("model"), Some("echo"));
        assert!(frame.requires_ack());
    }

    #[test]
    fn test_context_dto_blank_fields_become_none() {
        // テスト項目: 空白のみのフィールドは None として扱われる
        let dto = dto::ClientContextDto {
            client_name: Some("  ".to_string()),
            company: Some(" Acme ".to_string()),
            ..Default::default()
        };

        let context: ClientContext = dto.into();

        assert_eq!(context.client_name, None);
        assert_eq!(context.company.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_session_to_dto() {
        // テスト項目: セッションが DTO に変換される
        let session = ChatSession::new(
            SessionId::new("s1".to_string()).unwrap(),
            UserId::new("alice".to_string()).unwrap(),
            ClientContext::default(),
            Timestamp::new(0),
            1000,
        );

        let dto: dto::SessionDto = session.into();

        assert_eq!(dto.owner, "alice");
        assert_eq!(dto.status, "active");
        assert!(dto.expires_at.starts_with("1970-01-01T00:00:01"));
    }
}
