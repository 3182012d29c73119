//! Rate limit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 滑动窗口检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub total_hits: u64,
}

impl RateLimitResult {
    /// 距离窗口重置的秒数，向上取整且至少为 1
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// 单个动作的限流规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}
