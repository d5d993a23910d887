//! Live transport connections.
//!
//! A [`Connection`] is shared (`Arc`) between its socket tasks, the
//! [`ConnectionRegistry`] and the router. Its bounded outbound queue is the
//! only path to the socket writer; its [`CancellationToken`] is the single
//! close signal every per-connection task observes.

mod delivery;
mod registry;

pub use delivery::{DeliveryPolicy, ReliableDelivery, SweepOutcome};
pub use registry::ConnectionRegistry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use parley_shared::time::duration_to_millis;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::domain::{ConnectionId, SessionId, UserId};
use crate::infrastructure::dto::websocket::Frame;

/// Capacity of each connection's outbound queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Per-connection lifecycle; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticated = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Authenticated,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,

    #[error("connection is closed")]
    Closed,
}

/// Result of the staleness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    /// No pong within the heartbeat timeout; warn only
    HeartbeatOverdue,
    /// No activity within the stale timeout; close
    Stale,
}

/// An outbound frame awaiting acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub message_id: String,
    pub frame: Frame,
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PendingMessage {
    pub fn new(message_id: String, frame: Frame, enqueued_at: i64, max_retries: u32) -> Self {
        Self {
            message_id,
            frame,
            enqueued_at,
            retry_count: 0,
            max_retries,
        }
    }
}

/// Entries taken out of the pending table by a retry sweep
#[derive(Debug, Default)]
pub struct DuePending {
    /// Frames to resend verbatim
    pub resend: Vec<Frame>,
    /// Entries that used up their retries
    pub exhausted: Vec<PendingMessage>,
}

/// One live socket connection
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    session_id: RwLock<Option<SessionId>>,
    outbound: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<String, PendingMessage>>,
    connected_at: i64,
    last_activity: AtomicI64,
    last_pong: AtomicI64,
    typing: AtomicBool,
    state: AtomicU8,
    close_token: CancellationToken,
}

impl Connection {
    /// Create a connection in `Connecting` state together with the receiving
    /// end of its outbound queue
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        now: i64,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id,
            user_id,
            session_id: RwLock::new(None),
            outbound,
            pending: Mutex::new(HashMap::new()),
            connected_at: now,
            last_activity: AtomicI64::new(now),
            last_pong: AtomicI64::new(now),
            typing: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_token: CancellationToken::new(),
        };
        (connection, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    // ---- session association ----

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.read().clone()
    }

    pub fn is_attached_to(&self, session_id: &SessionId) -> bool {
        self.session_id.read().as_ref() == Some(session_id)
    }

    /// (Re)associate the connection with a session; returns the previous one
    pub fn attach_session(&self, session_id: SessionId) -> Option<SessionId> {
        self.session_id.write().replace(session_id)
    }

    // ---- outbound queue ----

    /// Non-blocking enqueue onto the outbound queue
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    // ---- activity ----

    pub fn touch(&self, now: i64) {
        self.last_activity.fetch_max(now, Ordering::Relaxed);
    }

    pub fn record_pong(&self, now: i64) {
        self.last_pong.fetch_max(now, Ordering::Relaxed);
        self.touch(now);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn last_pong(&self) -> i64 {
        self.last_pong.load(Ordering::Relaxed)
    }

    pub fn liveness(&self, now: i64, stale_after: Duration, heartbeat_timeout: Duration) -> Liveness {
        if now.saturating_sub(self.last_activity()) >= duration_to_millis(stale_after) {
            Liveness::Stale
        } else if now.saturating_sub(self.last_pong()) >= duration_to_millis(heartbeat_timeout) {
            Liveness::HeartbeatOverdue
        } else {
            Liveness::Healthy
        }
    }

    pub fn set_typing(&self, typing: bool) {
        self.typing.store(typing, Ordering::Relaxed);
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::Relaxed)
    }

    // ---- state machine ----

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `next`; returns false if the connection is already
    /// at or past it
    pub fn transition(&self, next: ConnectionState) -> bool {
        let previous = self.state.fetch_max(next as u8, Ordering::AcqRel);
        previous < next as u8
    }

    /// Fire the close signal; idempotent
    pub fn close(&self) {
        self.transition(ConnectionState::Closing);
        self.close_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close_token.is_cancelled()
    }

    /// Resolves once the close signal fired
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close_token.cancelled()
    }

    pub fn close_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    // ---- pending-ack table ----

    pub fn track_pending(&self, pending: PendingMessage) {
        self.pending
            .lock()
            .insert(pending.message_id.clone(), pending);
    }

    /// Retire a pending entry; returns whether it existed
    pub fn acknowledge(&self, message_id: &str) -> bool {
        self.pending.lock().remove(message_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.lock().contains_key(message_id)
    }

    /// Collect entries older than `retry_interval`: those with retries left
    /// are bumped and returned for resending, the rest are removed
    pub fn take_due(&self, now: i64, retry_interval: Duration) -> DuePending {
        let interval_ms = duration_to_millis(retry_interval);
        let mut due = DuePending::default();
        let mut pending = self.pending.lock();

        pending.retain(|_, entry| {
            if now.saturating_sub(entry.enqueued_at) < interval_ms {
                return true;
            }
            if entry.retry_count >= entry.max_retries {
                due.exhausted.push(entry.clone());
                return false;
            }
            entry.retry_count += 1;
            entry.enqueued_at = now;
            due.resend.push(entry.frame.clone());
            true
        });
        due
    }

    /// Keep a frame whose socket write failed for exactly one more attempt
    pub fn park_for_final_retry(&self, frame: Frame, now: i64, max_retries: u32) {
        let Some(message_id) = frame.message_id.clone() else {
            return;
        };
        let final_attempt = max_retries.saturating_sub(1);
        let mut pending = self.pending.lock();
        let entry = pending
            .entry(message_id.clone())
            .or_insert_with(|| PendingMessage::new(message_id, frame, now, max_retries));
        entry.retry_count = entry.retry_count.max(final_attempt);
    }
}
