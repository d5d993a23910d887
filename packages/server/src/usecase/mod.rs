//! Use case layer: session lifecycle and the chat exchange shared by both
//! transports.

mod error;
mod get_messages;
mod send_message;
mod session_lifecycle;

pub use error::{ChatError, SessionError};
pub use get_messages::{
    CacheValidators, GetMessagesUseCase, MessagePage, MessagesOutcome, MessagesQuery,
};
pub use send_message::{ChatExchange, PreparedExchange, SendChatMessageUseCase};
pub use session_lifecycle::{ResolvedSession, SessionLifecycleUseCase};
