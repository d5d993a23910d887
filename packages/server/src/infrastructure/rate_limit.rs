//! Sliding-window rate limiting.
//!
//! Each (action, subject) pair owns a bucket of recent request timestamps.
//! Buckets are created on first use and pruned lazily on every check: only
//! timestamps inside the trailing window count toward the limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use parley_shared::time::{Clock, duration_to_millis};

use crate::domain::{RateLimitAction, RateLimitDecision, RateLimitError, RateLimiter};

/// Requests allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// One policy per action class so exhausting one never starves another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub connection: RateLimitPolicy,
    pub session_create: RateLimitPolicy,
    pub message: RateLimitPolicy,
    pub api: RateLimitPolicy,
}

impl RateLimitPolicies {
    pub fn for_action(&self, action: RateLimitAction) -> RateLimitPolicy {
        match action {
            RateLimitAction::Connection => self.connection,
            RateLimitAction::SessionCreate => self.session_create,
            RateLimitAction::Message => self.message,
            RateLimitAction::Api => self.api,
        }
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            connection: RateLimitPolicy::per_minute(10),
            session_create: RateLimitPolicy {
                limit: 30,
                window: Duration::from_secs(3600),
            },
            message: RateLimitPolicy::per_minute(60),
            api: RateLimitPolicy::per_minute(120),
        }
    }
}

/// Recent request timestamps (Unix millis), oldest first
#[derive(Debug, Default)]
struct Bucket {
    timestamps: VecDeque<i64>,
}

impl Bucket {
    fn prune(&mut self, now: i64, window_ms: i64) {
        while self
            .timestamps
            .front()
            .is_some_and(|t| now.saturating_sub(*t) >= window_ms)
        {
            self.timestamps.pop_front();
        }
    }
}

/// In-process sliding-window limiter with one mutex per bucket
pub struct SlidingWindowRateLimiter {
    policies: RateLimitPolicies,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowRateLimiter {
    pub fn new(policies: RateLimitPolicies, clock: Arc<dyn Clock>) -> Self {
        Self {
            policies,
            buckets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return bucket.clone();
        }
        self.buckets
            .write()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Drop buckets whose timestamps have all left the longest window.
    ///
    /// Returns the number of buckets removed.
    pub fn prune_idle_buckets(&self) -> usize {
        let now = self.clock.now_millis();
        let longest = [
            self.policies.connection.window,
            self.policies.session_create.window,
            self.policies.message.window,
            self.policies.api.window,
        ]
        .into_iter()
        .max()
        .unwrap_or_default();
        let window_ms = duration_to_millis(longest);

        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let mut bucket = bucket.lock();
            bucket.prune(now, window_ms);
            !bucket.timestamps.is_empty()
        });
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check(
        &self,
        action: RateLimitAction,
        subject: &str,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let policy = self.policies.for_action(action);
        self.check_limit(&action.key(subject), policy.limit, policy.window)
    }

    fn check_limit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, RateLimitError> {
        if window.is_zero() {
            return Err(RateLimitError::InvalidPolicy {
                key: key.to_string(),
                reason: "window must be positive",
            });
        }

        let now = self.clock.now_millis();
        let window_ms = duration_to_millis(window);
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();
        bucket.prune(now, window_ms);

        let count = u32::try_from(bucket.timestamps.len()).unwrap_or(u32::MAX);
        if count < limit {
            bucket.timestamps.push_back(now);
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: limit - count - 1,
                retry_after: Duration::ZERO,
            });
        }

        let retry_after_ms = bucket
            .timestamps
            .front()
            .map_or(window_ms, |oldest| oldest + window_ms - now)
            .max(1);
        tracing::debug!("Rate limit exceeded for '{}' ({}/{})", key, count, limit);
        Ok(RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after: Duration::from_millis(u64::try_from(retry_after_ms).unwrap_or(1)),
        })
    }

    fn allow(&self, subject_key: &str) -> bool {
        match self.check(RateLimitAction::Api, subject_key) {
            Ok(decision) => decision.allowed,
            Err(e) => {
                tracing::warn!("Rate limiter error for '{}', allowing: {}", subject_key, e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::time::FixedClock;

    fn limiter_with(policies: RateLimitPolicies) -> (SlidingWindowRateLimiter, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(1_000_000));
        (SlidingWindowRateLimiter::new(policies, clock.clone()), clock)
    }

    #[test]
    fn test_n_plus_one_request_is_rejected_then_recovers_after_window() {
        // テスト項目: limit=N の場合 N+1 回目だけが拒否され、window 経過後は再び許可される
        // given (前提条件):
        let (limiter, clock) = limiter_with(RateLimitPolicies::default());
        let window = Duration::from_secs(60);

        // when (操作):
        let results: Vec<bool> = (0..6)
            .map(|_| {
                clock.advance(Duration::from_millis(100));
                limiter.check_limit("k", 5, window).unwrap().allowed
            })
            .collect();

        // then (期待する結果):
        assert_eq!(results, vec![true, true, true, true, true, false]);

        clock.advance(window);
        assert!(limiter.check_limit("k", 5, window).unwrap().allowed);
    }

    #[test]
    fn test_rejection_reports_retry_after_until_oldest_expires() {
        // テスト項目: 拒否時の retry_after は最古のリクエストが window を抜けるまでの時間
        // given (前提条件):
        let (limiter, clock) = limiter_with(RateLimitPolicies::default());
        let window = Duration::from_secs(10);
        limiter.check_limit("k", 1, window).unwrap();

        // when (操作):
        clock.advance(Duration::from_secs(4));
        let decision = limiter.check_limit("k", 1, window).unwrap();

        // then (期待する結果):
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Duration::from_secs(6));
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        // テスト項目: remaining が残り回数を返す
        let (limiter, _clock) = limiter_with(RateLimitPolicies::default());
        let window = Duration::from_secs(60);

        let remaining: Vec<u32> = (0..3)
            .map(|_| limiter.check_limit("k", 3, window).unwrap().remaining)
            .collect();

        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn test_rejected_requests_are_not_recorded() {
        // テスト項目: 拒否されたリクエストはウィンドウに記録されない
        // given (前提条件):
        let (limiter, clock) = limiter_with(RateLimitPolicies::default());
        let window = Duration::from_secs(10);
        limiter.check_limit("k", 1, window).unwrap();

        // when (操作): 拒否され続けても…
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            assert!(!limiter.check_limit("k", 1, window).unwrap().allowed);
        }
        clock.advance(Duration::from_secs(5));

        // then (期待する結果): 最初のリクエストが抜けた時点で許可される
        assert!(limiter.check_limit("k", 1, window).unwrap().allowed);
    }

    #[test]
    fn test_actions_use_independent_buckets() {
        // テスト項目: アクションごとにバケットが独立している
        // given (前提条件):
        let policies = RateLimitPolicies {
            message: RateLimitPolicy::per_minute(1),
            ..Default::default()
        };
        let (limiter, _clock) = limiter_with(policies);

        // when (操作):
        assert!(limiter.check(RateLimitAction::Message, "alice").unwrap().allowed);
        let second_message = limiter.check(RateLimitAction::Message, "alice").unwrap();
        let api = limiter.check(RateLimitAction::Api, "alice").unwrap();
        let other_user = limiter.check(RateLimitAction::Message, "bob").unwrap();

        // then (期待する結果):
        assert!(!second_message.allowed);
        assert!(api.allowed);
        assert!(other_user.allowed);
    }

    #[test]
    fn test_zero_window_is_an_error() {
        // テスト項目: window が 0 のポリシーはエラーになる
        let (limiter, _clock) = limiter_with(RateLimitPolicies::default());

        let result = limiter.check_limit("k", 1, Duration::ZERO);

        assert!(matches!(result, Err(RateLimitError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_allow_uses_api_policy() {
        // テスト項目: allow は API 用のポリシーで判定する
        let policies = RateLimitPolicies {
            api: RateLimitPolicy::per_minute(2),
            ..Default::default()
        };
        let (limiter, _clock) = limiter_with(policies);

        assert!(limiter.allow("alice"));
        assert!(limiter.allow("alice"));
        assert!(!limiter.allow("alice"));
    }

    #[test]
    fn test_prune_idle_buckets() {
        // テスト項目: すべてのタイムスタンプが失効したバケットは削除される
        // given (前提条件):
        let (limiter, clock) = limiter_with(RateLimitPolicies::default());
        limiter.check(RateLimitAction::Message, "alice").unwrap();
        limiter.check(RateLimitAction::Message, "bob").unwrap();

        // when (操作):
        clock.advance(Duration::from_secs(3600));
        limiter.check(RateLimitAction::Message, "bob").unwrap();
        let removed = limiter.prune_idle_buckets();

        // then (期待する結果):
        assert_eq!(removed, 1);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
