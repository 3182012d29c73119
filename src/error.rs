//! 统一错误模型
//! 认证错误分类、HTTP 状态映射，以及应用级错误到安全响应的收敛

use crate::cache::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// INTERNAL_ERROR 的固定对外消息
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// INTERNAL_ERROR 的固定建议
pub const INTERNAL_ERROR_SUGGESTIONS: [&str; 2] = [
    "Try again in a few moments",
    "Contact support if the problem persists",
];

/// 认证错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorType {
    // 输入错误
    ValidationError,
    EmailFormat,
    PasswordStrength,

    // 认证前置条件
    InvalidCredentials,
    EmailNotVerified,

    // 一次性令牌
    TokenExpired,
    TokenInvalid,

    // 保护性限流
    AccountLocked,
    RateLimitExceeded,

    // 安全告警
    SuspiciousActivity,

    // 系统故障
    InternalError,
    ServiceUnavailable,
}

impl AuthErrorType {
    pub const ALL: [AuthErrorType; 12] = [
        AuthErrorType::ValidationError,
        AuthErrorType::EmailFormat,
        AuthErrorType::PasswordStrength,
        AuthErrorType::InvalidCredentials,
        AuthErrorType::EmailNotVerified,
        AuthErrorType::TokenExpired,
        AuthErrorType::TokenInvalid,
        AuthErrorType::AccountLocked,
        AuthErrorType::RateLimitExceeded,
        AuthErrorType::SuspiciousActivity,
        AuthErrorType::InternalError,
        AuthErrorType::ServiceUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorType::ValidationError => "VALIDATION_ERROR",
            AuthErrorType::EmailFormat => "EMAIL_FORMAT",
            AuthErrorType::PasswordStrength => "PASSWORD_STRENGTH",
            AuthErrorType::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthErrorType::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthErrorType::TokenExpired => "TOKEN_EXPIRED",
            AuthErrorType::TokenInvalid => "TOKEN_INVALID",
            AuthErrorType::AccountLocked => "ACCOUNT_LOCKED",
            AuthErrorType::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AuthErrorType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            AuthErrorType::InternalError => "INTERNAL_ERROR",
            AuthErrorType::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorType::ValidationError
            | AuthErrorType::EmailFormat
            | AuthErrorType::PasswordStrength
            | AuthErrorType::InvalidCredentials
            | AuthErrorType::EmailNotVerified
            | AuthErrorType::TokenExpired
            | AuthErrorType::TokenInvalid => StatusCode::BAD_REQUEST,
            AuthErrorType::SuspiciousActivity => StatusCode::FORBIDDEN,
            AuthErrorType::AccountLocked => StatusCode::LOCKED,
            AuthErrorType::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AuthErrorType::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            AuthErrorType::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// 默认对外消息
    pub fn default_message(&self) -> &'static str {
        match self {
            AuthErrorType::ValidationError => "The request contains invalid data",
            AuthErrorType::EmailFormat => "Please enter a valid email address",
            AuthErrorType::PasswordStrength => "Password does not meet the security requirements",
            AuthErrorType::InvalidCredentials => "Invalid email or password",
            AuthErrorType::EmailNotVerified => "Please verify your email address before signing in",
            AuthErrorType::TokenExpired => "This link has expired",
            AuthErrorType::TokenInvalid => "This link is invalid or has already been used",
            AuthErrorType::AccountLocked => {
                "Account temporarily locked due to too many failed login attempts"
            }
            AuthErrorType::RateLimitExceeded => "Too many requests. Please slow down",
            AuthErrorType::SuspiciousActivity => {
                "Unusual activity was detected and this request was blocked"
            }
            AuthErrorType::InternalError => INTERNAL_ERROR_MESSAGE,
            AuthErrorType::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again later."
            }
        }
    }

    /// 默认建议列表
    pub fn default_suggestions(&self) -> &'static [&'static str] {
        match self {
            AuthErrorType::ValidationError => &["Check the highlighted field and try again"],
            AuthErrorType::EmailFormat => &["Enter an email address like name@example.com"],
            AuthErrorType::PasswordStrength => &[
                "Use at least 8 characters",
                "Mix upper and lower case letters, numbers and symbols",
            ],
            AuthErrorType::InvalidCredentials => &[
                "Check your email and password",
                "Use the password reset option if you forgot your password",
            ],
            AuthErrorType::EmailNotVerified => &[
                "Check your inbox for the verification email",
                "Request a new verification email",
            ],
            AuthErrorType::TokenExpired => &["Request a new link"],
            AuthErrorType::TokenInvalid => &[
                "Make sure you used the most recent link",
                "Request a new link",
            ],
            AuthErrorType::AccountLocked => &[
                "Wait until the lockout period ends",
                "Reset your password if you forgot it",
                "Contact support if this persists",
            ],
            AuthErrorType::RateLimitExceeded => &["Wait a moment before trying again"],
            AuthErrorType::SuspiciousActivity => &[
                "Verify your identity",
                "Contact support if you believe this is a mistake",
            ],
            AuthErrorType::InternalError => &INTERNAL_ERROR_SUGGESTIONS,
            AuthErrorType::ServiceUnavailable => &["Try again in a few moments"],
        }
    }
}

impl fmt::Display for AuthErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 认证错误
///
/// 所有字段都是可以直接返回给客户端的安全内容
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct AuthError {
    pub error_type: AuthErrorType,
    pub message: String,
    pub retry_after: Option<u64>,
    pub field: Option<String>,
    pub details: Option<serde_json::Value>,
    pub suggestions: Vec<String>,
}

impl AuthError {
    /// 使用类型默认消息和建议构造
    pub fn of(error_type: AuthErrorType) -> Self {
        Self {
            error_type,
            message: error_type.default_message().to_string(),
            retry_after: None,
            field: None,
            details: None,
            suggestions: error_type
                .default_suggestions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn new(error_type: AuthErrorType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::of(error_type)
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AuthErrorType::ValidationError, message)
    }

    pub fn email_format() -> Self {
        Self::of(AuthErrorType::EmailFormat).with_field("email")
    }

    /// 密码强度不足，列出未满足的要求
    pub fn password_strength(unmet_requirements: Vec<String>) -> Self {
        let mut error = Self::of(AuthErrorType::PasswordStrength).with_field("password");
        if !unmet_requirements.is_empty() {
            error.suggestions = unmet_requirements;
        }
        error
    }

    pub fn invalid_credentials() -> Self {
        Self::of(AuthErrorType::InvalidCredentials)
    }

    pub fn email_not_verified() -> Self {
        Self::of(AuthErrorType::EmailNotVerified)
    }

    pub fn token_expired() -> Self {
        Self::of(AuthErrorType::TokenExpired).with_field("token")
    }

    pub fn token_invalid() -> Self {
        Self::of(AuthErrorType::TokenInvalid).with_field("token")
    }

    pub fn account_locked(retry_after_secs: u64) -> Self {
        Self::of(AuthErrorType::AccountLocked).with_retry_after(retry_after_secs)
    }

    pub fn rate_limit_exceeded(retry_after_secs: u64) -> Self {
        Self::of(AuthErrorType::RateLimitExceeded).with_retry_after(retry_after_secs)
    }

    pub fn suspicious_activity() -> Self {
        Self::of(AuthErrorType::SuspiciousActivity)
    }

    pub fn internal() -> Self {
        Self::of(AuthErrorType::InternalError)
    }

    pub fn service_unavailable() -> Self {
        Self::of(AuthErrorType::ServiceUnavailable)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    /// 错误码，与类型相同
    pub fn code(&self) -> &'static str {
        self.error_type.as_str()
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_type.status_code()
    }
}

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn internal_error(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }

    pub fn as_auth_error(&self) -> Option<&AuthError> {
        match self {
            AppError::Auth(e) => Some(e),
            _ => None,
        }
    }

    /// 收敛为可以对外返回的错误
    ///
    /// 只有 `Auth` 会原样透出，其余错误一律变成固定消息的 INTERNAL_ERROR，
    /// 原始错误文本不会出现在结果中
    pub fn to_public(&self) -> AuthError {
        match self {
            AppError::Auth(e) => e.clone(),
            _ => AuthError::internal(),
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(e) => e.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let public = self.to_public();
        let request_id = crate::response::generate_request_id();

        if public.error_type == AuthErrorType::InternalError {
            tracing::error!(
                error = %self,
                request_id = %request_id,
                "Application error"
            );
        } else {
            tracing::warn!(
                error_type = %public.error_type,
                request_id = %request_id,
                "Request rejected"
            );
        }

        crate::response::error_response(&public, &request_id, chrono::Utc::now())
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}
