//! 维护任务
//!
//! 清理过期缓存键、锁定索引、开关缓存与过旧的安全事件。
//! 不在请求路径上自动运行，由管理接口显式触发。
//! 单个步骤失败不影响其他步骤。

use crate::{
    cache::CacheClient,
    clock::SharedClock,
    config::DatabaseConfig,
    services::{
        feature_flags::FeatureFlagService, lockout_service::LockoutService,
        security_logger::SecurityLogger,
    },
};
use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::sync::Arc;

/// 一次维护的结果
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_cache_keys: u64,
    pub stale_lockout_entries: u64,
    pub expired_flag_entries: u64,
    pub pruned_security_events: u64,
    /// 失败的步骤名
    pub failed_steps: Vec<&'static str>,
}

pub struct MaintenanceService {
    cache: CacheClient,
    lockouts: Arc<LockoutService>,
    flags: Arc<FeatureFlagService>,
    logger: Arc<SecurityLogger>,
    clock: SharedClock,
    event_retention: ChronoDuration,
}

impl MaintenanceService {
    pub fn new(
        cache: CacheClient,
        lockouts: Arc<LockoutService>,
        flags: Arc<FeatureFlagService>,
        logger: Arc<SecurityLogger>,
        clock: SharedClock,
        database: &DatabaseConfig,
    ) -> Self {
        Self {
            cache,
            lockouts,
            flags,
            logger,
            clock,
            event_retention: ChronoDuration::days(i64::from(database.event_retention_days)),
        }
    }

    pub async fn run(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.cache.purge_expired().await {
            Ok(n) => report.expired_cache_keys = n as u64,
            Err(e) => {
                tracing::warn!(error = %e, "Cache purge failed");
                report.failed_steps.push("cache");
            }
        }

        match self.lockouts.cleanup_expired_lockouts().await {
            Ok(n) => report.stale_lockout_entries = n,
            Err(e) => {
                tracing::warn!(error = %e, "Lockout index cleanup failed");
                report.failed_steps.push("lockouts");
            }
        }

        report.expired_flag_entries = self.flags.purge_expired() as u64;

        let cutoff = self.clock.now() - self.event_retention;
        match self.logger.prune_events_before(cutoff).await {
            Ok(n) => report.pruned_security_events = n,
            Err(e) => {
                tracing::warn!(error = %e, "Security event pruning failed");
                report.failed_steps.push("security_events");
            }
        }

        tracing::info!(
            expired_cache_keys = report.expired_cache_keys,
            stale_lockout_entries = report.stale_lockout_entries,
            expired_flag_entries = report.expired_flag_entries,
            pruned_security_events = report.pruned_security_events,
            failed = report.failed_steps.len(),
            "Maintenance finished"
        );
        report
    }
}
