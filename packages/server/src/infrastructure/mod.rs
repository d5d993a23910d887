//! Infrastructure layer: concrete implementations of the domain interfaces,
//! the per-connection transport state and the wire DTOs.

pub mod auth;
pub mod connection;
pub mod dto;
pub mod metrics;
pub mod rate_limit;
pub mod repository;
pub mod responder;
pub mod security;
