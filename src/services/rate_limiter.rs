//! 滑动窗口限流
//!
//! 每个 `(action, identifier)` 对应一个有序集合，成员分数为请求时间（毫秒）。
//! 一次检查在单个 pipeline 内完成：清理窗口外的成员、记录本次请求、
//! 读取基数、续期 TTL。被拒绝的请求同样会被记录。
//!
//! 存储不可用时放行（fail-open），并记录告警与指标。

use crate::{
    cache::{keys, CacheClient, Command, StoreError},
    clock::SharedClock,
    error::AuthError,
    models::rate_limit::{RateLimitResult, RateLimitRule},
};
use chrono::Duration as ChronoDuration;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct RateLimiter {
    cache: CacheClient,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(cache: CacheClient, clock: SharedClock) -> Self {
        Self { cache, clock }
    }

    /// 检查并记录一次请求
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        action: &str,
        limit: u32,
        window_secs: u64,
    ) -> RateLimitResult {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let window_ms = window_secs.saturating_mul(1000) as i64;
        let window_start = now_ms - window_ms;
        let reset_time = now + ChronoDuration::milliseconds(window_ms);
        let key = keys::rate_limit(action, identifier);

        let commands = vec![
            Command::ZRemRangeByScore {
                key: key.clone(),
                min: i64::MIN,
                max: window_start,
            },
            Command::ZAdd {
                key: key.clone(),
                score: now_ms,
                member: format!("{now_ms}-{}", Uuid::new_v4()),
            },
            Command::ZCard { key: key.clone() },
            Command::Expire {
                key,
                ttl: Duration::from_secs(window_secs),
            },
        ];

        let total_hits = match self.run_window(commands).await {
            Ok(hits) => hits,
            Err(e) => return self.fail_open(identifier, action, limit, reset_time, &e),
        };

        let allowed = total_hits <= u64::from(limit);
        let remaining = u64::from(limit).saturating_sub(total_hits) as u32;

        metrics::counter!(
            "rate_limit_checks_total",
            "result" => if allowed { "allowed" } else { "denied" }
        )
        .increment(1);

        if allowed {
            tracing::debug!(%identifier, %action, total_hits, remaining, "Rate limit check passed");
        } else {
            tracing::info!(%identifier, %action, total_hits, limit, "Rate limit exceeded");
        }

        RateLimitResult {
            allowed,
            remaining,
            reset_time,
            total_hits,
        }
    }

    async fn run_window(&self, commands: Vec<Command>) -> Result<u64, StoreError> {
        let replies = self.cache.pipeline(commands).await?;
        // 第三条命令是 ZCARD
        let cardinality = replies
            .into_iter()
            .nth(2)
            .ok_or(StoreError::UnexpectedReply { expected: "ZCARD reply" })?
            .into_int()?;
        Ok(cardinality.max(0) as u64)
    }

    fn fail_open(
        &self,
        identifier: &str,
        action: &str,
        limit: u32,
        reset_time: chrono::DateTime<chrono::Utc>,
        error: &StoreError,
    ) -> RateLimitResult {
        tracing::warn!(
            %identifier,
            %action,
            error = %error,
            "Rate limit store unavailable, allowing request"
        );
        metrics::counter!("rate_limit_fail_open_total").increment(1);

        RateLimitResult {
            allowed: true,
            remaining: limit,
            reset_time,
            total_hits: 0,
        }
    }

    /// 按规则检查
    pub async fn check_rule(
        &self,
        identifier: &str,
        action: &str,
        rule: RateLimitRule,
    ) -> RateLimitResult {
        self.check_rate_limit(identifier, action, rule.limit, rule.window_secs)
            .await
    }

    /// 检查并在超限时返回 RATE_LIMIT_EXCEEDED
    pub async fn enforce(
        &self,
        identifier: &str,
        action: &str,
        rule: RateLimitRule,
    ) -> Result<RateLimitResult, AuthError> {
        let result = self.check_rule(identifier, action, rule).await;
        if result.allowed {
            Ok(result)
        } else {
            Err(AuthError::rate_limit_exceeded(
                result.retry_after_secs(self.clock.now()),
            ))
        }
    }

    /// 查询当前窗口计数，不记录请求
    ///
    /// `allowed` 表示下一次请求是否会被放行
    pub async fn peek_rate_limit(
        &self,
        identifier: &str,
        action: &str,
        limit: u32,
        window_secs: u64,
    ) -> RateLimitResult {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let window_ms = window_secs.saturating_mul(1000) as i64;
        let reset_time = now + ChronoDuration::milliseconds(window_ms);
        let key = keys::rate_limit(action, identifier);

        let hits = match self
            .cache
            .sorted_range_by_score(&key, now_ms - window_ms + 1, i64::MAX)
            .await
        {
            Ok(entries) => entries.len() as u64,
            Err(e) => return self.fail_open(identifier, action, limit, reset_time, &e),
        };

        RateLimitResult {
            allowed: hits < u64::from(limit),
            remaining: u64::from(limit).saturating_sub(hits) as u32,
            reset_time,
            total_hits: hits,
        }
    }

    /// 清空某个标识的窗口，返回窗口是否存在
    pub async fn reset_rate_limit(&self, identifier: &str, action: &str) -> Result<bool, StoreError> {
        let removed = self
            .cache
            .delete(&keys::rate_limit(action, identifier))
            .await?;
        tracing::info!(%identifier, %action, removed, "Rate limit window reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryStore,
        clock::ManualClock,
        config::CacheConfig,
        error::AuthErrorType,
    };
    use std::sync::Arc;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::starting_now();
        let shared: SharedClock = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::with_clock(shared.clone()));
        let config = CacheConfig {
            op_timeout_ms: 500,
            key_prefix: String::new(),
            security_events_max_per_user: 100,
            security_events_ttl_secs: 3600,
        };
        (RateLimiter::new(CacheClient::new(store, &config), shared), clock)
    }

    #[tokio::test]
    async fn test_limit_then_deny() {
        let (limiter, _) = limiter();
        for i in 1..=3u32 {
            let r = limiter.check_rate_limit("1.2.3.4", "login", 3, 60).await;
            assert!(r.allowed);
            assert_eq!(r.total_hits, u64::from(i));
            assert_eq!(r.remaining, 3 - i);
        }
        let denied = limiter.check_rate_limit("1.2.3.4", "login", 3, 60).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.total_hits, 4);
    }

    #[tokio::test]
    async fn test_identifiers_and_actions_are_isolated() {
        let (limiter, _) = limiter();
        assert!(limiter.check_rate_limit("a", "login", 1, 60).await.allowed);
        assert!(limiter.check_rate_limit("b", "login", 1, 60).await.allowed);
        assert!(limiter.check_rate_limit("a", "register", 1, 60).await.allowed);
        assert!(!limiter.check_rate_limit("a", "login", 1, 60).await.allowed);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock) = limiter();
        limiter.check_rate_limit("ip", "login", 2, 10).await;
        clock.advance_secs(5);
        limiter.check_rate_limit("ip", "login", 2, 10).await;
        assert!(!limiter.check_rate_limit("ip", "login", 2, 10).await.allowed);

        // 第一次请求滑出窗口
        clock.advance_secs(6);
        let r = limiter.peek_rate_limit("ip", "login", 2, 10).await;
        assert_eq!(r.total_hits, 2);
    }

    #[tokio::test]
    async fn test_entry_at_window_start_is_pruned() {
        let (limiter, clock) = limiter();
        limiter.check_rate_limit("ip", "login", 1, 10).await;
        clock.advance_secs(10);
        let r = limiter.check_rate_limit("ip", "login", 1, 10).await;
        assert!(r.allowed);
        assert_eq!(r.total_hits, 1);
    }

    #[tokio::test]
    async fn test_peek_does_not_record() {
        let (limiter, _) = limiter();
        limiter.check_rate_limit("ip", "login", 2, 60).await;
        for _ in 0..5 {
            let r = limiter.peek_rate_limit("ip", "login", 2, 60).await;
            assert_eq!(r.total_hits, 1);
            assert!(r.allowed);
        }
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let (limiter, _) = limiter();
        limiter.check_rate_limit("ip", "login", 1, 60).await;
        assert!(limiter.reset_rate_limit("ip", "login").await.unwrap());
        assert!(limiter.check_rate_limit("ip", "login", 1, 60).await.allowed);
        assert!(!limiter.reset_rate_limit("other", "login").await.unwrap());
    }

    #[tokio::test]
    async fn test_enforce_maps_to_error() {
        let (limiter, _) = limiter();
        let rule = RateLimitRule::new(1, 120);
        limiter.enforce("ip", "login", rule).await.unwrap();
        let err = limiter.enforce("ip", "login", rule).await.unwrap_err();
        assert_eq!(err.error_type, AuthErrorType::RateLimitExceeded);
        assert_eq!(err.retry_after, Some(120));
    }
}
