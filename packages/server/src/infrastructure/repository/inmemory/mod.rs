//! In-memory repositories backed by `HashMap`s behind `tokio` locks.
//!
//! State lives for the lifetime of the process only; a multi-instance
//! deployment sees a different session set per instance.

mod message;
mod session;

pub use message::InMemoryMessageRepository;
pub use session::InMemorySessionRepository;
