//! Data Transfer Objects (DTOs) for the chat transports.
//!
//! DTOs are organized by protocol:
//! - `websocket`: socket frame envelope
//! - `http`: polling and session API bodies

pub mod conversion;
pub mod http;
pub mod websocket;
