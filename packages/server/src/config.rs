//! Runtime tunables of the chat transport.

use std::time::Duration;

use crate::domain::MAX_MESSAGE_CONTENT_LENGTH;
use crate::infrastructure::connection::{DeliveryPolicy, OUTBOUND_QUEUE_CAPACITY};
use crate::infrastructure::rate_limit::RateLimitPolicies;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Frames buffered per connection before new ones are dropped
    pub outbound_queue_capacity: usize,
    /// Transport-level ping period
    pub heartbeat_interval: Duration,
    /// No pong for this long logs a warning
    pub heartbeat_timeout: Duration,
    pub monitor_interval: Duration,
    /// No inbound activity for this long force-closes the connection
    pub stale_timeout: Duration,
    pub delivery: DeliveryPolicy,
    pub session_ttl: Duration,
    pub session_reap_interval: Duration,
    pub rate_limits: RateLimitPolicies,
    pub max_content_length: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(120),
            monitor_interval: Duration::from_secs(60),
            stale_timeout: Duration::from_secs(300),
            delivery: DeliveryPolicy::default(),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            session_reap_interval: Duration::from_secs(300),
            rate_limits: RateLimitPolicies::default(),
            max_content_length: MAX_MESSAGE_CONTENT_LENGTH,
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl TransportConfig {
    /// Clamp a requested page size into `1..=max_page_size`
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_clamped() {
        // テスト項目: ページサイズが既定値・上限・下限に丸められる
        let config = TransportConfig::default();

        assert_eq!(config.page_size(None), 50);
        assert_eq!(config.page_size(Some(10)), 10);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(1000)), 100);
    }
}
