//! Real-time chat transport: socket and polling transports over a shared
//! session lifecycle, with ack/retry delivery and per-user rate limits.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
