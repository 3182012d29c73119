//! 共享缓存存储
//! 键值存储契约：TTL、原子计数、有序集合、列表以及流水线批量执行

pub mod client;
pub mod keys;
pub mod memory;

pub use client::CacheClient;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// 缓存存储错误
///
/// 任何依赖方都把它视为"存储不可用"，再按各自的策略放行或拒绝
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("Value is not an integer or out of range: {0}")]
    NotInteger(String),

    #[error("Unexpected reply: expected {expected}")]
    UnexpectedReply { expected: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// 存储命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, ttl: Option<Duration> },
    Del { key: String },
    Incr { key: String },
    Expire { key: String, ttl: Duration },
    Ttl { key: String },
    ZAdd { key: String, score: i64, member: String },
    /// 删除分值位于 `[min, max]` 闭区间内的成员
    ZRemRangeByScore { key: String, min: i64, max: i64 },
    ZCard { key: String },
    /// 按分值升序返回 `[min, max]` 内的成员
    ZRangeByScore { key: String, min: i64, max: i64 },
    ZRem { key: String, member: String },
    LPush { key: String, value: String },
    /// 只保留 `[start, stop]` 下标区间，支持负下标
    LTrim { key: String, start: i64, stop: i64 },
    LRange { key: String, start: i64, stop: i64 },
    /// 以前缀扫描现存键
    Keys { prefix: String },
    Ping,
}

impl Command {
    /// 为命令中的键加上命名空间前缀
    pub fn prefixed(self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        let p = |key: String| format!("{prefix}{key}");
        match self {
            Command::Get { key } => Command::Get { key: p(key) },
            Command::Set { key, value, ttl } => Command::Set { key: p(key), value, ttl },
            Command::Del { key } => Command::Del { key: p(key) },
            Command::Incr { key } => Command::Incr { key: p(key) },
            Command::Expire { key, ttl } => Command::Expire { key: p(key), ttl },
            Command::Ttl { key } => Command::Ttl { key: p(key) },
            Command::ZAdd { key, score, member } => Command::ZAdd { key: p(key), score, member },
            Command::ZRemRangeByScore { key, min, max } => {
                Command::ZRemRangeByScore { key: p(key), min, max }
            }
            Command::ZCard { key } => Command::ZCard { key: p(key) },
            Command::ZRangeByScore { key, min, max } => {
                Command::ZRangeByScore { key: p(key), min, max }
            }
            Command::ZRem { key, member } => Command::ZRem { key: p(key), member },
            Command::LPush { key, value } => Command::LPush { key: p(key), value },
            Command::LTrim { key, start, stop } => Command::LTrim { key: p(key), start, stop },
            Command::LRange { key, start, stop } => Command::LRange { key: p(key), start, stop },
            Command::Keys { prefix: pattern } => Command::Keys { prefix: p(pattern) },
            Command::Ping => Command::Ping,
        }
    }
}

/// 命令应答
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Value(String),
    Values(Vec<String>),
    Scored(Vec<(String, i64)>),
}

impl Reply {
    pub fn into_int(self) -> Result<i64, StoreError> {
        match self {
            Reply::Int(n) => Ok(n),
            _ => Err(StoreError::UnexpectedReply { expected: "integer" }),
        }
    }

    pub fn into_optional_value(self) -> Result<Option<String>, StoreError> {
        match self {
            Reply::Value(v) => Ok(Some(v)),
            Reply::Nil => Ok(None),
            _ => Err(StoreError::UnexpectedReply { expected: "value or nil" }),
        }
    }

    pub fn into_values(self) -> Result<Vec<String>, StoreError> {
        match self {
            Reply::Values(v) => Ok(v),
            Reply::Nil => Ok(Vec::new()),
            _ => Err(StoreError::UnexpectedReply { expected: "list of values" }),
        }
    }

    pub fn into_scored(self) -> Result<Vec<(String, i64)>, StoreError> {
        match self {
            Reply::Scored(v) => Ok(v),
            Reply::Nil => Ok(Vec::new()),
            _ => Err(StoreError::UnexpectedReply { expected: "scored members" }),
        }
    }
}

/// 键值存储后端
///
/// `pipeline` 的原子性取决于后端：内置的 [`MemoryStore`] 在同一把锁内执行整个批次；
/// 远程后端如果只能逐条发送命令，就只保证顺序，不保证隔离性
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn execute(&self, command: Command) -> Result<Reply, StoreError>;

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.push(self.execute(command).await?);
        }
        Ok(replies)
    }

    /// 清除已过期的键，返回清除数量；自带过期机制的后端无需实现
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
