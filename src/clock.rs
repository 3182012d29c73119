//! 时间源
//! 所有 TTL 与窗口计算都通过 Clock 取当前时间，测试中可替换为 ManualClock

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// 墙钟时间源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 当前 Unix 毫秒时间戳
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟，用于测试窗口过期与锁定到期
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// 从当前系统时间开始
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 共享时钟句柄
pub type SharedClock = Arc<dyn Clock>;

/// 默认系统时钟句柄
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
