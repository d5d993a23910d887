//! Inbound frame dispatch for socket connections.

use std::sync::Arc;

use parley_shared::time::{Clock, timestamp_to_rfc3339};

use crate::{
    domain::{ClientContext, Counter, MetricsSink},
    infrastructure::{
        connection::{Connection, ConnectionRegistry, ReliableDelivery},
        dto::{
            http::ClientContextDto,
            websocket::{Frame, FrameType, error_code},
        },
    },
    usecase::{ChatError, SendChatMessageUseCase},
};

use super::error::{chat_error_code, chat_error_message, record_chat_error};

/// Decodes frames read from a connection and dispatches them by type
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    delivery: Arc<ReliableDelivery>,
    send_message: Arc<SendChatMessageUseCase>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        delivery: Arc<ReliableDelivery>,
        send_message: Arc<SendChatMessageUseCase>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            delivery,
            send_message,
            metrics,
            clock,
        }
    }

    fn timestamp(&self) -> String {
        timestamp_to_rfc3339(self.clock.now_millis())
    }

    /// Decode a text frame and route it; undecodable input gets an error frame
    pub async fn route_text(&self, connection: &Arc<Connection>, text: &str) {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => self.route(frame, connection).await,
            Err(e) => {
                tracing::debug!("Malformed frame from '{}': {}", connection.id(), e);
                self.reject_invalid(connection, "", format!("malformed frame: {}", e));
            }
        }
    }

    pub async fn route(&self, frame: Frame, connection: &Arc<Connection>) {
        match frame.r#type {
            FrameType::Message => self.handle_message(frame, connection).await,
            FrameType::Typing => self.handle_typing(&frame, connection),
            FrameType::Presence => {
                let status = frame.meta_str("status").unwrap_or("online");
                self.announce_presence(connection, status);
            }
            FrameType::Ack => self.handle_ack(&frame, connection),
            FrameType::Heartbeat => {
                let reply = Frame::new(FrameType::Heartbeat, frame.session_id, self.timestamp());
                self.delivery.enqueue(connection, reply);
            }
            FrameType::Status | FrameType::Error => {
                self.reject_invalid(
                    connection,
                    &frame.session_id,
                    format!("unsupported frame type {:?}", frame.r#type),
                );
            }
        }
    }

    async fn handle_message(&self, frame: Frame, connection: &Arc<Connection>) {
        let Some(content) = frame.content.as_deref() else {
            self.reject_invalid(connection, &frame.session_id, "message content is required");
            return;
        };

        let prepared = match self
            .send_message
            .prepare(
                connection.user_id(),
                &frame.session_id,
                content,
                context_from(&frame),
            )
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => return self.reject(connection, &frame.session_id, &e),
        };
        self.metrics.increment(Counter::MessagesReceived);

        let session_id = prepared.session.id.clone();
        if let Some(previous) = connection.attach_session(session_id.clone())
            && previous != session_id
        {
            tracing::debug!(
                "Connection '{}' moved from session '{}' to '{}'",
                connection.id(),
                previous,
                session_id
            );
        }

        // The ack references the client's id when it sent one
        let acked_id = frame
            .message_id
            .clone()
            .unwrap_or_else(|| prepared.user_message.id.to_string());
        self.delivery.enqueue(
            connection,
            Frame::ack(session_id.as_str(), acked_id, self.timestamp()),
        );

        let exchange = match self.send_message.complete(prepared).await {
            Ok(exchange) => exchange,
            Err(e) => return self.reject(connection, session_id.as_str(), &e),
        };

        let reply = Frame::from(&exchange.reply);
        if self.delivery.send(connection, reply.clone()) {
            self.metrics.increment(Counter::MessagesSent);
        }
        let siblings = self.registry.get_by_session(&session_id);
        let fanned_out = self
            .delivery
            .broadcast(&siblings, &reply, Some(connection.id()));
        for _ in 0..fanned_out {
            self.metrics.increment(Counter::MessagesSent);
        }
    }

    fn handle_typing(&self, frame: &Frame, connection: &Arc<Connection>) {
        let typing = frame.meta_bool("typing").unwrap_or(true);
        connection.set_typing(typing);

        let Some(session_id) = connection.session_id() else {
            return;
        };
        let notice = Frame::new(FrameType::Typing, session_id.as_str(), self.timestamp())
            .with_meta("user_id", connection.user_id().as_str())
            .with_meta("typing", typing);
        let siblings = self.registry.get_by_session(&session_id);
        self.delivery
            .broadcast(&siblings, &notice, Some(connection.id()));
    }

    fn handle_ack(&self, frame: &Frame, connection: &Arc<Connection>) {
        match frame.message_id.as_deref() {
            Some(message_id) => {
                self.delivery.acknowledge(connection, message_id);
            }
            None => self.reject_invalid(connection, &frame.session_id, "ack requires message_id"),
        }
    }

    /// Tell the user's other connections that this one changed presence
    pub fn announce_presence(&self, connection: &Arc<Connection>, status: &str) {
        let session_id = connection
            .session_id()
            .map(|id| id.into_string())
            .unwrap_or_default();
        let notice = Frame::new(FrameType::Presence, session_id, self.timestamp())
            .with_meta("user_id", connection.user_id().as_str())
            .with_meta("connection_id", connection.id().as_str())
            .with_meta("status", status);
        let others = self.registry.get_by_user(connection.user_id());
        self.delivery
            .broadcast(&others, &notice, Some(connection.id()));
    }

    fn reject(&self, connection: &Connection, session_id: &str, e: &ChatError) {
        record_chat_error(self.metrics.as_ref(), e);
        if matches!(e, ChatError::Transport(_) | ChatError::Collaborator(_)) {
            tracing::warn!("Chat exchange on '{}' failed: {}", connection.id(), e);
        }
        let mut frame = Frame::error(
            session_id,
            chat_error_code(e),
            chat_error_message(e),
            self.timestamp(),
        );
        if let ChatError::RateLimited { retry_after_secs } = e {
            frame = frame.with_meta("retry_after", *retry_after_secs);
        }
        tracing::debug!("Rejected frame from '{}': {}", connection.id(), e);
        self.delivery.enqueue(connection, frame);
    }

    fn reject_invalid(&self, connection: &Connection, session_id: &str, message: impl Into<String>) {
        self.metrics.increment(Counter::ValidationErrors);
        let frame = Frame::error(session_id, error_code::VALIDATION, message, self.timestamp());
        self.delivery.enqueue(connection, frame);
    }
}

/// Client context fields sent in a message frame's metadata
fn context_from(frame: &Frame) -> Option<ClientContext> {
    let field = |key: &str| frame.meta_str(key).map(str::to_string);
    let dto = ClientContextDto {
        client_name: field("client_name"),
        company: field("company"),
        email: field("email"),
        meeting_topic: field("meeting_topic"),
        notes: field("notes"),
    };
    let context = ClientContext::from(dto);
    (context != ClientContext::default()).then_some(context)
}
