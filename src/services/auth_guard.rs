//! 认证保护编排
//!
//! 受保护动作依次经过：邮箱格式校验 → 功能开关 → 账户锁定（仅登录）→ 速率限制。
//! 登录失败累计到阈值时锁定账户。

use crate::{
    clock::SharedClock,
    config::SecurityConfig,
    error::{AppError, AuthError, AuthErrorType},
    models::{
        lockout::LockoutRecord,
        rate_limit::RateLimitResult,
        security_event::RequestContext,
    },
    services::{
        feature_flags::{flag_for_action, FeatureFlagService, FLAG_SUSPICIOUS_ACTIVITY_DETECTION},
        lockout_service::LockoutService,
        rate_limiter::RateLimiter,
        security_logger::{metadata, SecurityLogger},
    },
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("email regex is valid")
});

/// 邮箱格式校验
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.len() <= 254 && EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(AuthError::email_format())
    }
}

/// 通过检查后的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardDecision {
    pub action: String,
    pub rate_limit: RateLimitResult,
}

/// 一次登录失败的处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginFailureOutcome {
    pub failed_attempts: u64,
    pub max_attempts: u32,
    pub lockout: Option<LockoutRecord>,
}

pub struct AuthGuard {
    flags: Arc<FeatureFlagService>,
    rate_limiter: Arc<RateLimiter>,
    lockouts: Arc<LockoutService>,
    logger: Arc<SecurityLogger>,
    security: SecurityConfig,
    clock: SharedClock,
}

impl AuthGuard {
    pub fn new(
        flags: Arc<FeatureFlagService>,
        rate_limiter: Arc<RateLimiter>,
        lockouts: Arc<LockoutService>,
        logger: Arc<SecurityLogger>,
        security: SecurityConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            flags,
            rate_limiter,
            lockouts,
            logger,
            security,
            clock,
        }
    }

    /// 限流标识：优先 IP，取不到 IP 时用 email
    fn rate_limit_identifier<'a>(email: Option<&'a str>, context: &'a RequestContext) -> &'a str {
        if context.ip_address != RequestContext::UNKNOWN {
            &context.ip_address
        } else {
            email.unwrap_or(RequestContext::UNKNOWN)
        }
    }

    /// 执行受保护动作前的全部检查
    pub async fn guard(
        &self,
        action: &str,
        email: Option<&str>,
        context: &RequestContext,
    ) -> Result<GuardDecision, AuthError> {
        if let Some(email) = email {
            validate_email(email)?;
        }

        let (Some(flag), Some(rule)) = (flag_for_action(action), self.security.rule_for(action)) else {
            return Err(AuthError::validation(format!("Unsupported action: {action}")).with_field("action"));
        };

        let mut flag_ctx = self.flags.context().with_ip(context.ip_address.clone());
        if let Some(email) = email {
            flag_ctx = flag_ctx.with_email(email);
        }
        if !self.flags.is_enabled(flag, &flag_ctx).await {
            tracing::info!(%action, %flag, "Protected action disabled by feature flag");
            return Err(AuthError::new(
                AuthErrorType::ServiceUnavailable,
                "This feature is currently unavailable. Please try again later.",
            ));
        }

        // 锁定检查先于限流，已锁定的登录不占用限流配额
        if action == "login" {
            if let Some(email) = email {
                self.lockouts.ensure_not_locked(email).await?;
            }
        }

        let identifier = Self::rate_limit_identifier(email, context);
        let rate_limit = self.rate_limiter.check_rule(identifier, action, rule).await;
        if !rate_limit.allowed {
            self.logger
                .log_rate_limit_exceeded(identifier, action, email, context, &rate_limit)
                .await;
            return Err(AuthError::rate_limit_exceeded(
                rate_limit.retry_after_secs(self.clock.now()),
            ));
        }

        Ok(GuardDecision {
            action: action.to_string(),
            rate_limit,
        })
    }

    /// 登录失败：记录事件、累计失败次数，达到阈值时锁定
    pub async fn record_login_failure(
        &self,
        email: &str,
        context: &RequestContext,
        reason: &str,
    ) -> LoginFailureOutcome {
        self.logger
            .log_authentication_attempt(email, None, false, context, Some(reason))
            .await;

        let failed_attempts = self.lockouts.increment_login_attempts(email).await;
        let max_attempts = self.lockouts.max_login_attempts();

        let mut lockout = None;
        if failed_attempts >= u64::from(max_attempts) {
            lockout = self
                .lockouts
                .lock_account(email, "Too many failed login attempts")
                .await;

            if let Some(record) = &lockout {
                self.logger
                    .log_account_lockout(email, context, record.locked_until, failed_attempts)
                    .await;

                let detection_ctx = self.flags.context().with_email(email);
                if self
                    .flags
                    .is_enabled(FLAG_SUSPICIOUS_ACTIVITY_DETECTION, &detection_ctx)
                    .await
                {
                    self.logger
                        .log_suspicious_activity(
                            Some(email),
                            context,
                            "repeated_login_failures",
                            metadata([("failedAttempts", json!(failed_attempts))]),
                        )
                        .await;
                }
            }
        }

        LoginFailureOutcome {
            failed_attempts,
            max_attempts,
            lockout,
        }
    }

    /// 登录成功：清零失败计数并记录会话
    pub async fn record_login_success(&self, email: &str, user_id: &str, context: &RequestContext) {
        self.lockouts.reset_login_attempts(email).await;
        self.logger
            .log_authentication_attempt(email, Some(user_id), true, context, None)
            .await;
        self.logger.log_session_created(user_id, email, context).await;
    }

    /// 在保护下执行一次登录
    ///
    /// `authenticate` 返回用户 ID；返回 INVALID_CREDENTIALS 时计入失败次数，
    /// 触发锁定时直接返回 ACCOUNT_LOCKED
    pub async fn run_login<F, Fut>(
        &self,
        email: &str,
        context: &RequestContext,
        authenticate: F,
    ) -> Result<String, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AppError>>,
    {
        self.guard("login", Some(email), context).await?;

        match authenticate().await {
            Ok(user_id) => {
                self.record_login_success(email, &user_id, context).await;
                Ok(user_id)
            }
            Err(AppError::Auth(e)) if e.error_type == AuthErrorType::InvalidCredentials => {
                let outcome = self
                    .record_login_failure(email, context, "invalid_credentials")
                    .await;
                match outcome.lockout {
                    Some(_) => Err(AuthError::account_locked(self.security.lockout_duration_secs).into()),
                    None => Err(AppError::Auth(e)),
                }
            }
            Err(e) => Err(e),
        }
    }
}
