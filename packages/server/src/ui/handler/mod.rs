//! Request handlers.

mod auth;
mod error;
mod http;
mod router;
mod websocket;

pub use auth::RequestContext;
pub use error::ApiError;
pub use http::{
    create_session, debug_metrics, delete_session, get_messages, get_session, health_check,
    list_sessions, send_message, update_session_context,
};
pub use router::MessageRouter;
pub use websocket::websocket_handler;
