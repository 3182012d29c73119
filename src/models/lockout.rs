//! Lockout domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 账户锁定记录
///
/// 只在锁定期间存在；读不到记录即表示账户未锁定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutRecord {
    pub locked_until: DateTime<Utc>,
    pub reason: String,
    pub locked_at: DateTime<Utc>,
}

impl LockoutRecord {
    /// 剩余锁定秒数，向上取整
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.locked_until - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.locked_until > now
    }
}

/// 管理端列出的活跃锁定
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLockout {
    pub email: String,
    #[serde(flatten)]
    pub record: LockoutRecord,
}
