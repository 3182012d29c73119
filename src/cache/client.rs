//! 缓存客户端
//! 为每次存储调用加上超时与键前缀，并提供类型化的便捷方法

use super::{CacheStore, Command, Reply, StoreError};
use crate::config::CacheConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 带超时的缓存客户端
///
/// Clone 成本低廉，各服务各持有一份
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    key_prefix: String,
    op_timeout: Duration,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            op_timeout: Duration::from_millis(config.op_timeout_ms),
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("cache_store_timeouts_total").increment(1);
                Err(StoreError::Timeout(self.op_timeout))
            }
        }
    }

    /// 执行单条命令
    pub async fn execute(&self, command: Command) -> Result<Reply, StoreError> {
        let command = command.prefixed(&self.key_prefix);
        self.bounded(self.store.execute(command)).await
    }

    /// 批量执行命令，整个批次共享一个超时
    pub async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        let expected = commands.len();
        let commands = commands
            .into_iter()
            .map(|c| c.prefixed(&self.key_prefix))
            .collect();
        let replies = self.bounded(self.store.pipeline(commands)).await?;
        if replies.len() != expected {
            return Err(StoreError::UnexpectedReply {
                expected: "one reply per pipelined command",
            });
        }
        Ok(replies)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.execute(Command::Get { key: key.to_string() })
            .await?
            .into_optional_value()
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.execute(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl: None,
        })
        .await
        .map(|_| ())
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.execute(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl: Some(ttl),
        })
        .await
        .map(|_| ())
    }

    /// 删除键，返回键是否存在
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.execute(Command::Del { key: key.to_string() }).await?.into_int()? > 0)
    }

    pub async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.execute(Command::Incr { key: key.to_string() })
            .await?
            .into_int()
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self
            .execute(Command::Expire {
                key: key.to_string(),
                ttl,
            })
            .await?
            .into_int()?
            > 0)
    }

    pub async fn sorted_add(&self, key: &str, score: i64, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .execute(Command::ZAdd {
                key: key.to_string(),
                score,
                member: member.to_string(),
            })
            .await?
            .into_int()?
            > 0)
    }

    pub async fn sorted_remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        let removed = self
            .execute(Command::ZRemRangeByScore {
                key: key.to_string(),
                min,
                max,
            })
            .await?
            .into_int()?;
        Ok(removed.max(0) as u64)
    }

    pub async fn sorted_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        let n = self
            .execute(Command::ZCard { key: key.to_string() })
            .await?
            .into_int()?;
        Ok(n.max(0) as u64)
    }

    pub async fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        self.execute(Command::ZRangeByScore {
            key: key.to_string(),
            min,
            max,
        })
        .await?
        .into_scored()
    }

    pub async fn sorted_remove_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .execute(Command::ZRem {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?
            .into_int()?
            > 0)
    }

    pub async fn list_push(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let len = self
            .execute(Command::LPush {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await?
            .into_int()?;
        Ok(len.max(0) as u64)
    }

    pub async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        self.execute(Command::LTrim {
            key: key.to_string(),
            start,
            stop,
        })
        .await
        .map(|_| ())
    }

    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.execute(Command::LRange {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_values()
    }

    /// 按前缀列出键，返回值已去掉客户端前缀
    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys = self
            .execute(Command::Keys {
                prefix: prefix.to_string(),
            })
            .await?
            .into_values()?;
        Ok(keys
            .into_iter()
            .map(|k| {
                k.strip_prefix(self.key_prefix.as_str())
                    .map(str::to_string)
                    .unwrap_or(k)
            })
            .collect())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set_with_ttl(key, &raw, ttl).await
    }

    /// 存储健康检查
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.execute(Command::Ping).await.map(|_| ())
    }

    /// 清除后端中已过期的键
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.bounded(self.store.purge_expired()).await
    }
}
