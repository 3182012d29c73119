//! Security event models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 安全事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginAttempt,
    Logout,
    Registration,
    PasswordResetRequested,
    PasswordResetCompleted,
    EmailVerification,
    AccountLocked,
    AccountUnlocked,
    RateLimitExceeded,
    SuspiciousActivity,
    TokenGenerated,
    TokenInvalidated,
    SessionCreated,
    AuthError,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 14] = [
        SecurityEventType::LoginAttempt,
        SecurityEventType::Logout,
        SecurityEventType::Registration,
        SecurityEventType::PasswordResetRequested,
        SecurityEventType::PasswordResetCompleted,
        SecurityEventType::EmailVerification,
        SecurityEventType::AccountLocked,
        SecurityEventType::AccountUnlocked,
        SecurityEventType::RateLimitExceeded,
        SecurityEventType::SuspiciousActivity,
        SecurityEventType::TokenGenerated,
        SecurityEventType::TokenInvalidated,
        SecurityEventType::SessionCreated,
        SecurityEventType::AuthError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginAttempt => "login_attempt",
            SecurityEventType::Logout => "logout",
            SecurityEventType::Registration => "registration",
            SecurityEventType::PasswordResetRequested => "password_reset_requested",
            SecurityEventType::PasswordResetCompleted => "password_reset_completed",
            SecurityEventType::EmailVerification => "email_verification",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::AccountUnlocked => "account_unlocked",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::SuspiciousActivity => "suspicious_activity",
            SecurityEventType::TokenGenerated => "token_generated",
            SecurityEventType::TokenInvalidated => "token_invalidated",
            SecurityEventType::SessionCreated => "session_created",
            SecurityEventType::AuthError => "auth_error",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown security event type: {s}"))
    }
}

/// 事件附加信息
pub type EventMetadata = serde_json::Map<String, serde_json::Value>;

/// 安全事件，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub success: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl SecurityEvent {
    /// 用户最近事件列表的归属主体：user_id，其次 email
    pub fn subject(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.email.as_deref())
    }
}

/// 可疑聚集的维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    Email,
    IpAddress,
}

/// 在短窗口内同一 email 或 IP 的多次失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousCluster {
    pub kind: ClusterKind,
    pub subject: String,
    pub failed_attempts: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpActivity {
    pub ip_address: String,
    pub event_count: u64,
    pub failed_count: u64,
}

/// 安全报表
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: u64,
    pub successful_events: u64,
    pub failed_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub top_ip_addresses: Vec<IpActivity>,
    pub suspicious_activity: Vec<SuspiciousCluster>,
    pub generated_at: DateTime<Utc>,
}

/// 发起请求的客户端信息，取不到时为 "unknown"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub ip_address: String,
    pub user_agent: String,
}

impl RequestContext {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN, Self::UNKNOWN)
    }
}
