//! 账户锁定管理
//!
//! 状态机：UNLOCKED → LOCKED → UNLOCKED。锁定记录只在锁定期间存在，
//! 读不到记录即未锁定。活跃锁定另有一个有序集合索引（email → 锁定时间），
//! 仅供管理端枚举，枚举时逐条复核。
//!
//! 存储异常时降级：读取视为未锁定，计数返回 0，写入记录告警后忽略。

use crate::{
    cache::{keys, CacheClient, Command, StoreError},
    clock::SharedClock,
    config::SecurityConfig,
    error::AuthError,
    models::lockout::{ActiveLockout, LockoutRecord},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

#[derive(Clone)]
pub struct LockoutService {
    cache: CacheClient,
    clock: SharedClock,
    login_attempts_ttl: Duration,
    lockout_duration: Duration,
    max_login_attempts: u32,
}

impl LockoutService {
    pub fn new(cache: CacheClient, clock: SharedClock, config: &SecurityConfig) -> Self {
        Self {
            cache,
            clock,
            login_attempts_ttl: Duration::from_secs(config.login_attempts_ttl_secs),
            lockout_duration: config.lockout_duration(),
            max_login_attempts: config.max_login_attempts,
        }
    }

    pub fn max_login_attempts(&self) -> u32 {
        self.max_login_attempts
    }

    // ==================== Login Attempts ====================

    /// 失败计数加一并续期 TTL，返回新的计数
    pub async fn increment_login_attempts(&self, email: &str) -> u64 {
        let key = keys::login_attempts(email);
        let result = self
            .cache
            .pipeline(vec![
                Command::Incr { key: key.clone() },
                Command::Expire {
                    key,
                    ttl: self.login_attempts_ttl,
                },
            ])
            .await
            .and_then(|replies| {
                replies
                    .into_iter()
                    .next()
                    .ok_or(StoreError::UnexpectedReply { expected: "INCR reply" })?
                    .into_int()
            });

        match result {
            Ok(count) => {
                tracing::debug!(%email, attempts = count, "Login attempt recorded");
                count.max(0) as u64
            }
            Err(e) => {
                tracing::warn!(%email, error = %e, "Failed to record login attempt");
                0
            }
        }
    }

    pub async fn get_login_attempts(&self, email: &str) -> u64 {
        match self.cache.get(&keys::login_attempts(email)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(%email, error = %e, "Failed to read login attempts");
                0
            }
        }
    }

    pub async fn reset_login_attempts(&self, email: &str) {
        if let Err(e) = self.cache.delete(&keys::login_attempts(email)).await {
            tracing::warn!(%email, error = %e, "Failed to reset login attempts");
        }
    }

    // ==================== Lockout ====================

    /// 写入锁定记录，TTL 为剩余锁定时间；截止时间已过则不做任何事
    pub async fn set_account_lockout(
        &self,
        email: &str,
        locked_until: DateTime<Utc>,
        reason: &str,
    ) -> Option<LockoutRecord> {
        let now = self.clock.now();
        let remaining_ms = (locked_until - now).num_milliseconds();
        if remaining_ms <= 0 {
            tracing::debug!(%email, %locked_until, "Lockout end is in the past, ignoring");
            return None;
        }

        let record = LockoutRecord {
            locked_until,
            reason: reason.to_string(),
            locked_at: now,
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(%email, error = %e, "Failed to serialize lockout record");
                return None;
            }
        };

        let result = self
            .cache
            .pipeline(vec![
                Command::Set {
                    key: keys::lockout(email),
                    value: raw,
                    ttl: Some(Duration::from_millis(remaining_ms as u64)),
                },
                Command::ZAdd {
                    key: keys::active_lockouts(),
                    score: now.timestamp_millis(),
                    member: email.to_string(),
                },
            ])
            .await;

        match result {
            Ok(_) => {
                metrics::counter!("account_lockouts_total").increment(1);
                tracing::warn!(%email, %locked_until, %reason, "Account locked");
                Some(record)
            }
            Err(e) => {
                tracing::warn!(%email, error = %e, "Failed to store account lockout");
                None
            }
        }
    }

    /// 按配置的锁定时长锁定账户
    pub async fn lock_account(&self, email: &str, reason: &str) -> Option<LockoutRecord> {
        let until = self.clock.now() + ChronoDuration::milliseconds(self.lockout_duration.as_millis() as i64);
        self.set_account_lockout(email, until, reason).await
    }

    /// 读取锁定记录；None 即未锁定
    pub async fn get_account_lockout(&self, email: &str) -> Option<LockoutRecord> {
        match self.cache.get_json::<LockoutRecord>(&keys::lockout(email)).await {
            Ok(Some(record)) if record.is_active(self.clock.now()) => Some(record),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(%email, error = %e, "Failed to read account lockout, treating as unlocked");
                None
            }
        }
    }

    /// 解除锁定：删除记录、索引项与失败计数
    pub async fn clear_account_lockout(&self, email: &str) -> Result<(), StoreError> {
        self.cache
            .pipeline(vec![
                Command::Del {
                    key: keys::lockout(email),
                },
                Command::ZRem {
                    key: keys::active_lockouts(),
                    member: email.to_string(),
                },
                Command::Del {
                    key: keys::login_attempts(email),
                },
            ])
            .await
            .map_err(|e| {
                tracing::warn!(%email, error = %e, "Failed to clear account lockout");
                e
            })?;

        tracing::info!(%email, "Account lockout cleared");
        Ok(())
    }

    /// 已锁定时返回 ACCOUNT_LOCKED，retry_after 为剩余秒数
    pub async fn ensure_not_locked(&self, email: &str) -> Result<(), AuthError> {
        match self.get_account_lockout(email).await {
            Some(record) => Err(AuthError::account_locked(
                record.remaining_secs(self.clock.now()).max(1),
            )),
            None => Ok(()),
        }
    }

    // ==================== Admin ====================

    /// 列出活跃锁定；索引中已过期的条目被跳过
    pub async fn list_active_lockouts(&self) -> Vec<ActiveLockout> {
        let candidates = match self
            .cache
            .sorted_range_by_score(&keys::active_lockouts(), i64::MIN, i64::MAX)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read lockout index");
                return Vec::new();
            }
        };

        let mut active = Vec::with_capacity(candidates.len());
        for (email, _) in candidates {
            if let Some(record) = self.get_account_lockout(&email).await {
                active.push(ActiveLockout { email, record });
            }
        }
        active
    }

    /// 清理索引中记录已不存在的条目，返回清理数量
    pub async fn cleanup_expired_lockouts(&self) -> Result<u64, StoreError> {
        let index = keys::active_lockouts();
        let candidates = self
            .cache
            .sorted_range_by_score(&index, i64::MIN, i64::MAX)
            .await?;

        let mut removed = 0;
        for (email, _) in candidates {
            if self.cache.get(&keys::lockout(&email)).await?.is_none()
                && self.cache.sorted_remove_member(&index, &email).await?
            {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Stale lockout index entries removed");
        }
        Ok(removed)
    }
}
