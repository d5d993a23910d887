//! UI layer: axum routes, socket and HTTP handlers, server bootstrap.

pub mod handler;
mod server;
mod signal;
pub mod state;

pub use server::Server;
pub use state::{AppState, Collaborators};
