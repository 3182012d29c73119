//! 安全事件日志服务
//!
//! 每个事件写两处：用户最近事件列表（缓存，保留最近 N 条）与持久化仓库。
//! 任何写入失败都不会向调用方传播，事件转而写入降级日志通道。

use crate::{
    cache::{keys, CacheClient, Command},
    clock::SharedClock,
    config::AppConfig,
    error::{AppError, AuthError, AuthErrorType},
    models::{
        rate_limit::RateLimitResult,
        security_event::{
            ClusterKind, EventMetadata, IpActivity, RequestContext, SecurityEvent,
            SecurityEventType, SecurityReport, SuspiciousCluster,
        },
        token::TokenPurpose,
    },
    repository::security_event_repo::SecurityEventRepository,
    telemetry::SECURITY_FALLBACK_TARGET,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 报表中保留的 IP 数量
const TOP_IP_LIMIT: usize = 10;

/// 安全事件参数结构体
#[derive(Debug, Clone)]
pub struct SecurityEventParams<'a> {
    pub event_type: SecurityEventType,
    pub success: bool,
    pub user_id: Option<&'a str>,
    pub email: Option<&'a str>,
    pub context: &'a RequestContext,
    pub metadata: EventMetadata,
}

impl<'a> SecurityEventParams<'a> {
    pub fn new(event_type: SecurityEventType, success: bool, context: &'a RequestContext) -> Self {
        Self {
            event_type,
            success,
            user_id: None,
            email: None,
            context,
            metadata: EventMetadata::new(),
        }
    }

    pub fn user_id(mut self, user_id: Option<&'a str>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn email(mut self, email: Option<&'a str>) -> Self {
        self.email = email;
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

pub struct SecurityLogger {
    cache: CacheClient,
    repo: Arc<dyn SecurityEventRepository>,
    clock: SharedClock,
    repo_timeout: Duration,
    max_per_user: usize,
    events_ttl: Duration,
    suspicious_threshold: u64,
    suspicious_window: ChronoDuration,
}

impl SecurityLogger {
    pub fn new(
        cache: CacheClient,
        repo: Arc<dyn SecurityEventRepository>,
        clock: SharedClock,
        config: &AppConfig,
    ) -> Self {
        Self {
            cache,
            repo,
            clock,
            repo_timeout: Duration::from_millis(config.database.query_timeout_ms),
            max_per_user: config.cache.security_events_max_per_user,
            events_ttl: Duration::from_secs(config.cache.security_events_ttl_secs),
            suspicious_threshold: config.security.suspicious_failure_threshold.max(1),
            suspicious_window: ChronoDuration::seconds(config.security.suspicious_window_secs as i64),
        }
    }

    /// 仓库调用超时，超时视为仓库不可用
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.repo_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("security_event_repo_timeouts_total").increment(1);
                Err(AuthError::new(
                    AuthErrorType::ServiceUnavailable,
                    "Security event store is temporarily unavailable",
                )
                .into())
            }
        }
    }

    /// 记录安全事件，返回写入的事件
    pub async fn log_security_event(&self, params: SecurityEventParams<'_>) -> SecurityEvent {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            event_type: params.event_type,
            success: params.success,
            user_id: params.user_id.map(str::to_string),
            email: params.email.map(str::to_string),
            ip_address: params.context.ip_address.clone(),
            user_agent: params.context.user_agent.clone(),
            timestamp: self.clock.now(),
            metadata: params.metadata,
        };

        metrics::counter!("security_events_total", "event_type" => event.event_type.as_str())
            .increment(1);
        tracing::debug!(
            event_type = %event.event_type,
            success = event.success,
            ip = %event.ip_address,
            "Security event"
        );

        if let Some(subject) = event.subject() {
            if let Err(e) = self.push_recent(subject, &event).await {
                self.fallback(&event, &e.to_string());
            }
        }

        if let Err(e) = self.bounded(self.repo.insert(&event)).await {
            self.fallback(&event, &e.to_string());
        }

        event
    }

    async fn push_recent(&self, subject: &str, event: &SecurityEvent) -> Result<(), AppError> {
        let key = keys::security_events(subject);
        let raw = serde_json::to_string(event).map_err(|e| AppError::internal_error(e.to_string()))?;
        self.cache
            .pipeline(vec![
                Command::LPush {
                    key: key.clone(),
                    value: raw,
                },
                Command::LTrim {
                    key: key.clone(),
                    start: 0,
                    stop: self.max_per_user as i64 - 1,
                },
                Command::Expire {
                    key,
                    ttl: self.events_ttl,
                },
            ])
            .await?;
        Ok(())
    }

    fn fallback(&self, event: &SecurityEvent, error: &str) {
        metrics::counter!("security_event_fallback_total").increment(1);
        let payload = serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));
        tracing::error!(
            target: SECURITY_FALLBACK_TARGET,
            event = %payload,
            error = %error,
            "Security event could not be persisted"
        );
    }

    // ==================== Helpers ====================

    pub async fn log_authentication_attempt(
        &self,
        email: &str,
        user_id: Option<&str>,
        success: bool,
        context: &RequestContext,
        failure_reason: Option<&str>,
    ) -> SecurityEvent {
        let mut params = SecurityEventParams::new(SecurityEventType::LoginAttempt, success, context)
            .user_id(user_id)
            .email(Some(email));
        if let Some(reason) = failure_reason {
            params = params.meta("reason", reason);
        }
        self.log_security_event(params).await
    }

    pub async fn log_account_lockout(
        &self,
        email: &str,
        context: &RequestContext,
        locked_until: DateTime<Utc>,
        failed_attempts: u64,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::AccountLocked, true, context)
                .email(Some(email))
                .meta("lockedUntil", locked_until.to_rfc3339())
                .meta("failedAttempts", failed_attempts),
        )
        .await
    }

    pub async fn log_account_unlocked(
        &self,
        email: &str,
        context: &RequestContext,
        unlocked_by: &str,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::AccountUnlocked, true, context)
                .email(Some(email))
                .meta("unlockedBy", unlocked_by),
        )
        .await
    }

    pub async fn log_suspicious_activity(
        &self,
        email: Option<&str>,
        context: &RequestContext,
        reason: &str,
        details: EventMetadata,
    ) -> SecurityEvent {
        let mut params = SecurityEventParams::new(SecurityEventType::SuspiciousActivity, false, context)
            .email(email)
            .meta("reason", reason);
        params.metadata.extend(details);
        self.log_security_event(params).await
    }

    pub async fn log_token_generated(
        &self,
        user_id: &str,
        email: &str,
        purpose: TokenPurpose,
        context: &RequestContext,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::TokenGenerated, true, context)
                .user_id(Some(user_id))
                .email(Some(email))
                .meta("purpose", purpose.as_str()),
        )
        .await
    }

    pub async fn log_token_invalidated(
        &self,
        user_id: &str,
        purpose: TokenPurpose,
        context: &RequestContext,
        reason: &str,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::TokenInvalidated, true, context)
                .user_id(Some(user_id))
                .meta("purpose", purpose.as_str())
                .meta("reason", reason),
        )
        .await
    }

    pub async fn log_session_created(
        &self,
        user_id: &str,
        email: &str,
        context: &RequestContext,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::SessionCreated, true, context)
                .user_id(Some(user_id))
                .email(Some(email)),
        )
        .await
    }

    pub async fn log_rate_limit_exceeded(
        &self,
        identifier: &str,
        action: &str,
        email: Option<&str>,
        context: &RequestContext,
        result: &RateLimitResult,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::RateLimitExceeded, false, context)
                .email(email)
                .meta("identifier", identifier)
                .meta("action", action)
                .meta("totalHits", result.total_hits)
                .meta("resetTime", result.reset_time.to_rfc3339()),
        )
        .await
    }

    /// 错误处理层产生的事件，只记录错误类型与请求 ID
    pub async fn log_auth_error(
        &self,
        operation: &str,
        error_type: AuthErrorType,
        request_id: &str,
        user_id: Option<&str>,
        email: Option<&str>,
        context: &RequestContext,
    ) -> SecurityEvent {
        self.log_security_event(
            SecurityEventParams::new(SecurityEventType::AuthError, false, context)
                .user_id(user_id)
                .email(email)
                .meta("operation", operation)
                .meta("errorType", error_type.as_str())
                .meta("requestId", request_id),
        )
        .await
    }

    // ==================== Queries ====================

    /// 用户最近事件，新的在前；缓存不可用时回退到仓库
    pub async fn get_recent_events(&self, subject: &str, limit: usize) -> Vec<SecurityEvent> {
        let limit = limit.clamp(1, self.max_per_user);
        match self
            .cache
            .list_range(&keys::security_events(subject), 0, limit as i64 - 1)
            .await
        {
            Ok(raw) if !raw.is_empty() => {
                return raw
                    .iter()
                    .filter_map(|r| serde_json::from_str::<SecurityEvent>(r).ok())
                    .collect();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%subject, error = %e, "Recent events cache unavailable, reading repository");
            }
        }

        match self
            .bounded(self.repo.recent_by_subject(subject, limit as i64))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(%subject, error = %e, "Failed to read recent security events");
                Vec::new()
            }
        }
    }

    /// 删除早于 `cutoff` 的持久化事件
    pub async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let removed = self.bounded(self.repo.prune_before(cutoff)).await?;
        if removed > 0 {
            tracing::info!(%cutoff, removed, "Old security events pruned");
        }
        Ok(removed)
    }

    /// 生成时间范围内的安全报表
    pub async fn generate_security_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SecurityReport, AppError> {
        let events = self.bounded(self.repo.query_range(start, end)).await?;

        let total_events = events.len() as u64;
        let successful_events = events.iter().filter(|e| e.success).count() as u64;

        let mut events_by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_ip: HashMap<&str, IpActivity> = HashMap::new();
        for event in &events {
            *events_by_type
                .entry(event.event_type.as_str().to_string())
                .or_default() += 1;

            let activity = by_ip
                .entry(event.ip_address.as_str())
                .or_insert_with(|| IpActivity {
                    ip_address: event.ip_address.clone(),
                    event_count: 0,
                    failed_count: 0,
                });
            activity.event_count += 1;
            if !event.success {
                activity.failed_count += 1;
            }
        }

        let mut top_ip_addresses: Vec<IpActivity> = by_ip.into_values().collect();
        top_ip_addresses.sort_by(|a, b| {
            b.event_count
                .cmp(&a.event_count)
                .then_with(|| a.ip_address.cmp(&b.ip_address))
        });
        top_ip_addresses.truncate(TOP_IP_LIMIT);

        let suspicious_activity = self.detect_clusters(&events);

        tracing::info!(
            %start,
            %end,
            total_events,
            clusters = suspicious_activity.len(),
            "Security report generated"
        );

        Ok(SecurityReport {
            period_start: start,
            period_end: end,
            total_events,
            successful_events,
            failed_events: total_events - successful_events,
            events_by_type,
            top_ip_addresses,
            suspicious_activity,
            generated_at: self.clock.now(),
        })
    }

    /// 同一 email 或 IP 在窗口内失败次数达到阈值即视为可疑
    fn detect_clusters(&self, events: &[SecurityEvent]) -> Vec<SuspiciousCluster> {
        let failures: Vec<&SecurityEvent> = events
            .iter()
            .filter(|e| !e.success && e.event_type == SecurityEventType::LoginAttempt)
            .collect();

        let mut groups: BTreeMap<(u8, String), Vec<DateTime<Utc>>> = BTreeMap::new();
        for event in &failures {
            if let Some(email) = &event.email {
                groups.entry((0, email.clone())).or_default().push(event.timestamp);
            }
            if event.ip_address != RequestContext::UNKNOWN {
                groups
                    .entry((1, event.ip_address.clone()))
                    .or_default()
                    .push(event.timestamp);
            }
        }

        let mut clusters = Vec::new();
        for ((kind, subject), mut times) in groups {
            times.sort();
            if let Some((count, first, last)) = densest_window(&times, self.suspicious_window) {
                if count >= self.suspicious_threshold {
                    clusters.push(SuspiciousCluster {
                        kind: if kind == 0 {
                            ClusterKind::Email
                        } else {
                            ClusterKind::IpAddress
                        },
                        subject,
                        failed_attempts: count,
                        first_seen: first,
                        last_seen: last,
                    });
                }
            }
        }

        clusters.sort_by(|a, b| b.failed_attempts.cmp(&a.failed_attempts));
        clusters
    }
}

/// 已排序时间序列中，跨度不超过 window 的最大子序列
fn densest_window(
    times: &[DateTime<Utc>],
    window: ChronoDuration,
) -> Option<(u64, DateTime<Utc>, DateTime<Utc>)> {
    let mut best: Option<(u64, DateTime<Utc>, DateTime<Utc>)> = None;
    let mut left = 0;
    for right in 0..times.len() {
        while times[right] - times[left] > window {
            left += 1;
        }
        let count = (right - left + 1) as u64;
        if best.map_or(true, |(c, _, _)| count > c) {
            best = Some((count, times[left], times[right]));
        }
    }
    best
}

/// 便捷构造元数据
pub fn metadata(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> EventMetadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
