//! 一次性令牌集成测试

use auth_guard::{
    error::AuthErrorType,
    models::{security_event::SecurityEventType, token::TokenPurpose},
    services::token_service::{hash_token, TOKEN_LENGTH},
};
use std::sync::Arc;

mod common;
use common::{client_context, FailingStore, TestContext, YieldingStore};

#[tokio::test]
async fn test_password_reset_token_lifecycle() {
    let ctx = TestContext::new();
    let tokens = &ctx.state.token_service;
    let logger = &ctx.state.security_logger;

    let issued = tokens
        .issue_token("user-1", "a@b.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();
    assert_eq!(issued.token.len(), TOKEN_LENGTH);
    logger
        .log_token_generated("user-1", "a@b.com", TokenPurpose::PasswordReset, &client_context())
        .await;

    // 另一种用途查不到
    assert!(tokens
        .get_token(&issued.token, TokenPurpose::EmailVerification)
        .await
        .unwrap()
        .is_none());

    let record = tokens
        .consume_token(&issued.token, TokenPurpose::PasswordReset)
        .await
        .unwrap();
    assert_eq!(record.user_id, "user-1");
    assert_eq!(record.token, issued.token);
    logger
        .log_token_invalidated("user-1", TokenPurpose::PasswordReset, &client_context(), "consumed")
        .await;

    let err = tokens
        .verify_token(&issued.token, TokenPurpose::PasswordReset)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, AuthErrorType::TokenInvalid);

    let events = ctx.all_events().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, SecurityEventType::TokenGenerated);
    assert_eq!(events[1].event_type, SecurityEventType::TokenInvalidated);
    assert_eq!(events[1].metadata["purpose"], "password_reset");
    assert!(!events
        .iter()
        .any(|e| e.metadata.values().any(|v| v.as_str() == Some(issued.token.as_str()))));
}

#[tokio::test]
async fn test_new_token_replaces_previous_one() {
    let ctx = TestContext::new();
    let tokens = &ctx.state.token_service;

    let first = tokens
        .issue_token("user-1", "a@b.com", TokenPurpose::EmailVerification)
        .await
        .unwrap();
    let second = tokens
        .issue_token("user-1", "a@b.com", TokenPurpose::EmailVerification)
        .await
        .unwrap();

    assert!(tokens
        .verify_token(&first.token, TokenPurpose::EmailVerification)
        .await
        .is_err());
    assert!(tokens
        .verify_token(&second.token, TokenPurpose::EmailVerification)
        .await
        .is_ok());

    assert!(tokens
        .invalidate_user_token("user-1", TokenPurpose::EmailVerification)
        .await
        .unwrap());
    assert!(!tokens
        .invalidate_token(&second.token, TokenPurpose::EmailVerification)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_token_expires_with_ttl() {
    let ctx = TestContext::new();
    let tokens = &ctx.state.token_service;

    let issued = tokens
        .issue_token("user-1", "a@b.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();
    ctx.clock.advance_secs(3599);
    assert!(tokens
        .verify_token(&issued.token, TokenPurpose::PasswordReset)
        .await
        .is_ok());

    ctx.clock.advance_secs(2);
    let err = tokens
        .verify_token(&issued.token, TokenPurpose::PasswordReset)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, AuthErrorType::TokenInvalid);
}

#[tokio::test]
async fn test_only_token_hash_is_stored() {
    let ctx = TestContext::new();
    let issued = ctx
        .state
        .token_service
        .issue_token("user-1", "a@b.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    let keys = ctx.state.cache.keys("").await.unwrap();
    assert!(keys.iter().all(|k| !k.contains(&issued.token)));
    assert!(keys.iter().any(|k| k.contains(&hash_token(&issued.token))));
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let ctx = TestContext::with_store(Arc::new(FailingStore));
    let tokens = &ctx.state.token_service;

    let err = tokens
        .issue_token("user-1", "a@b.com", TokenPurpose::PasswordReset)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, AuthErrorType::ServiceUnavailable);

    let err = tokens
        .verify_token("whatever", TokenPurpose::PasswordReset)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, AuthErrorType::ServiceUnavailable);
}

#[tokio::test]
async fn test_concurrent_consumers_only_one_succeeds() {
    let ctx = TestContext::with_store(Arc::new(YieldingStore::new()));
    let tokens = &ctx.state.token_service;

    let issued = tokens
        .issue_token("user-1", "a@b.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        tokens.consume_token(&issued.token, TokenPurpose::PasswordReset),
        tokens.consume_token(&issued.token, TokenPurpose::PasswordReset),
    );
    let successes = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);

    let err = first.err().or(second.err()).unwrap();
    assert_eq!(err.error_type, AuthErrorType::TokenInvalid);
}
