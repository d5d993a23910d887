//! At-least-once delivery of chat frames over a connection.
//!
//! Ack-requiring frames are recorded in the connection's pending table before
//! they are enqueued, so a frame dropped on a full queue is still retried. A
//! periodic sweep resends overdue entries verbatim (same message id) until the
//! peer acks them or they run out of retries. Retries carry no ordering
//! guarantee relative to newer traffic.

use std::sync::Arc;
use std::time::Duration;

use parley_shared::time::{Clock, timestamp_to_rfc3339};

use super::{Connection, EnqueueError, PendingMessage};
use crate::domain::{ConnectionId, Counter, MetricsSink};
use crate::infrastructure::dto::websocket::{Frame, FrameType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Age after which an unacknowledged frame is resent
    pub retry_interval: Duration,
    pub max_retries: u32,
    /// How often each connection's pending table is swept
    pub sweep_interval: Duration,
    /// Send a `status` frame when a message exhausts its retries
    pub notify_failures: bool,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            max_retries: 3,
            sweep_interval: Duration::from_secs(30),
            notify_failures: true,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub resent: usize,
    /// Message ids dropped after max retries
    pub failed: Vec<String>,
}

pub struct ReliableDelivery {
    policy: DeliveryPolicy,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl ReliableDelivery {
    pub fn new(policy: DeliveryPolicy, metrics: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            metrics,
            clock,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Send a frame, tracking it for acknowledgment when required.
    ///
    /// Returns whether the frame made it onto the queue.
    pub fn send(&self, connection: &Connection, frame: Frame) -> bool {
        if frame.requires_ack()
            && let Some(message_id) = frame.message_id.clone()
        {
            connection.track_pending(PendingMessage::new(
                message_id,
                frame.clone(),
                self.clock.now_millis(),
                self.policy.max_retries,
            ));
        }
        self.enqueue(connection, frame)
    }

    /// Fire-and-forget enqueue; a full queue drops the frame
    pub fn enqueue(&self, connection: &Connection, frame: Frame) -> bool {
        let frame_type = frame.r#type;
        match connection.try_enqueue(frame) {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                self.metrics.increment(Counter::FramesDropped);
                tracing::warn!(
                    "Outbound queue of connection '{}' is full, dropping {:?} frame",
                    connection.id(),
                    frame_type
                );
                false
            }
            Err(EnqueueError::Closed) => {
                tracing::debug!(
                    "Connection '{}' is closed, discarding {:?} frame",
                    connection.id(),
                    frame_type
                );
                false
            }
        }
    }

    /// Send `frame` to every target except `exclude`; returns how many accepted it
    pub fn broadcast<'a, I>(&self, targets: I, frame: &Frame, exclude: Option<&ConnectionId>) -> usize
    where
        I: IntoIterator<Item = &'a Arc<Connection>>,
    {
        targets
            .into_iter()
            .filter(|c| exclude != Some(c.id()))
            .filter(|c| self.send(c, frame.clone()))
            .count()
    }

    /// Retire the pending entry matching an ack from the peer
    pub fn acknowledge(&self, connection: &Connection, message_id: &str) -> bool {
        let acknowledged = connection.acknowledge(message_id);
        if !acknowledged {
            tracing::debug!(
                "Ack for unknown message '{}' on connection '{}'",
                message_id,
                connection.id()
            );
        }
        acknowledged
    }

    /// Keep a frame whose socket write failed for one final retry
    pub fn park_for_final_retry(&self, connection: &Connection, frame: Frame) {
        if frame.requires_ack() {
            connection.park_for_final_retry(
                frame,
                self.clock.now_millis(),
                self.policy.max_retries,
            );
        }
    }

    /// One pass over the connection's pending table
    pub fn sweep(&self, connection: &Connection) -> SweepOutcome {
        let now = self.clock.now_millis();
        let due = connection.take_due(now, self.policy.retry_interval);
        let mut outcome = SweepOutcome::default();

        for frame in due.resend {
            self.metrics.increment(Counter::Retries);
            if self.enqueue(connection, frame) {
                outcome.resent += 1;
            }
        }

        for pending in due.exhausted {
            self.metrics.increment(Counter::DeliveryFailures);
            tracing::warn!(
                "Delivery of message '{}' to connection '{}' failed after {} retries",
                pending.message_id,
                connection.id(),
                pending.retry_count
            );
            if self.policy.notify_failures {
                let notice = Frame::new(
                    FrameType::Status,
                    pending.frame.session_id.clone(),
                    timestamp_to_rfc3339(now),
                )
                .with_message_id(pending.message_id.clone())
                .with_meta("state", "delivery_failed");
                self.enqueue(connection, notice);
            }
            outcome.failed.push(pending.message_id);
        }
        outcome
    }

    /// Sweep a connection periodically until its close signal fires
    pub async fn run_sweeper(self: Arc<Self>, connection: Arc<Connection>) {
        let mut interval = tokio::time::interval(self.policy.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = connection.closed() => break,
                _ = interval.tick() => {
                    let outcome = self.sweep(&connection);
                    if outcome.resent > 0 || !outcome.failed.is_empty() {
                        tracing::debug!(
                            "Retry sweep on '{}': {} resent, {} failed",
                            connection.id(),
                            outcome.resent,
                            outcome.failed.len()
                        );
                    }
                }
            }
        }
    }
}
