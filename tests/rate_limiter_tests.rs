//! 滑动窗口限流集成测试

use auth_guard::{cache::CacheStore, error::AuthErrorType, models::rate_limit::RateLimitRule};
use chrono::Duration;
use std::sync::Arc;

mod common;
use common::{create_test_config, test_start_time, FailingStore, SlowStore, TestContext};

const IP: &str = "198.51.100.4";

#[tokio::test]
async fn test_limit_then_denied_then_allowed_after_window() {
    let ctx = TestContext::new();
    let limiter = &ctx.state.rate_limiter;

    for expected_hits in 1..=5u64 {
        let result = limiter.check_rate_limit(IP, "login", 5, 900).await;
        assert!(result.allowed, "request {expected_hits} should be allowed");
        assert_eq!(result.total_hits, expected_hits);
        assert_eq!(result.remaining, 5 - expected_hits as u32);
        assert_eq!(result.reset_time, test_start_time() + Duration::seconds(900));
    }

    let denied = limiter.check_rate_limit(IP, "login", 5, 900).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.total_hits, 6);

    ctx.clock.advance_secs(901);
    let result = limiter.check_rate_limit(IP, "login", 5, 900).await;
    assert!(result.allowed);
    assert_eq!(result.total_hits, 1);
    assert_eq!(result.remaining, 4);
}

#[tokio::test]
async fn test_window_slides_instead_of_resetting() {
    let ctx = TestContext::new();
    let limiter = &ctx.state.rate_limiter;

    for _ in 0..3 {
        limiter.check_rate_limit(IP, "login", 5, 900).await;
    }
    ctx.clock.advance_secs(600);
    for _ in 0..2 {
        limiter.check_rate_limit(IP, "login", 5, 900).await;
    }

    // 最早的三次请求恰好落在窗口起点上，被清理
    ctx.clock.advance_secs(300);
    let result = limiter.check_rate_limit(IP, "login", 5, 900).await;
    assert!(result.allowed);
    assert_eq!(result.total_hits, 3);
    assert_eq!(result.remaining, 2);
}

#[tokio::test]
async fn test_identifiers_and_actions_are_independent() {
    let ctx = TestContext::new();
    let limiter = &ctx.state.rate_limiter;

    for _ in 0..3 {
        limiter.check_rate_limit(IP, "register", 3, 3600).await;
    }
    assert!(!limiter.check_rate_limit(IP, "register", 3, 3600).await.allowed);

    let other_ip = limiter.check_rate_limit("198.51.100.5", "register", 3, 3600).await;
    assert!(other_ip.allowed);
    assert_eq!(other_ip.total_hits, 1);

    let other_action = limiter.check_rate_limit(IP, "password_reset", 3, 3600).await;
    assert!(other_action.allowed);
    assert_eq!(other_action.total_hits, 1);
}

#[tokio::test]
async fn test_peek_does_not_record() {
    let ctx = TestContext::new();
    let limiter = &ctx.state.rate_limiter;

    limiter.check_rate_limit(IP, "login", 2, 60).await;
    let peek = limiter.peek_rate_limit(IP, "login", 2, 60).await;
    assert_eq!(peek.total_hits, 1);
    assert!(peek.allowed);

    let peek_again = limiter.peek_rate_limit(IP, "login", 2, 60).await;
    assert_eq!(peek_again.total_hits, 1);

    limiter.check_rate_limit(IP, "login", 2, 60).await;
    let full = limiter.peek_rate_limit(IP, "login", 2, 60).await;
    assert!(!full.allowed);
    assert_eq!(full.remaining, 0);
}

#[tokio::test]
async fn test_reset_clears_window() {
    let ctx = TestContext::new();
    let limiter = &ctx.state.rate_limiter;

    limiter.check_rate_limit(IP, "login", 1, 60).await;
    assert!(!limiter.check_rate_limit(IP, "login", 1, 60).await.allowed);

    assert!(limiter.reset_rate_limit(IP, "login").await.unwrap());
    assert!(limiter.check_rate_limit(IP, "login", 1, 60).await.allowed);
    assert!(!limiter.reset_rate_limit("198.51.100.99", "login").await.unwrap());
}

#[tokio::test]
async fn test_enforce_returns_rate_limit_error_with_retry_after() {
    let ctx = TestContext::new();
    let limiter = &ctx.state.rate_limiter;
    let rule = RateLimitRule::new(1, 900);

    assert!(limiter.enforce(IP, "login", rule).await.is_ok());
    let err = limiter.enforce(IP, "login", rule).await.unwrap_err();
    assert_eq!(err.error_type, AuthErrorType::RateLimitExceeded);
    assert_eq!(err.retry_after, Some(900));
}

#[tokio::test]
async fn test_fail_open_when_store_unavailable() {
    let ctx = TestContext::with_store(Arc::new(FailingStore));
    let limiter = &ctx.state.rate_limiter;

    for _ in 0..10 {
        let result = limiter.check_rate_limit(IP, "login", 5, 900).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 5);
        assert_eq!(result.total_hits, 0);
        assert_eq!(result.reset_time, test_start_time() + Duration::seconds(900));
    }
}

#[tokio::test]
async fn test_fail_open_when_store_times_out() {
    let mut config = create_test_config();
    config.cache.op_timeout_ms = 20;
    let store: Arc<dyn CacheStore> = Arc::new(SlowStore {
        delay: std::time::Duration::from_secs(2),
    });
    let ctx = TestContext::with_config_and_store(config, store);

    let result = ctx.state.rate_limiter.check_rate_limit(IP, "login", 5, 900).await;
    assert!(result.allowed);
    assert_eq!(result.total_hits, 0);
}
