//! Security event repository (安全事件持久化)
//!
//! 期望的表结构：
//!
//! ```sql
//! CREATE TABLE security_events (
//!     id          UUID PRIMARY KEY,
//!     event_type  TEXT        NOT NULL,
//!     success     BOOLEAN     NOT NULL,
//!     user_id     TEXT,
//!     email       TEXT,
//!     ip_address  TEXT        NOT NULL,
//!     user_agent  TEXT        NOT NULL,
//!     metadata    JSONB       NOT NULL DEFAULT '{}',
//!     occurred_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX idx_security_events_occurred_at ON security_events (occurred_at);
//! ```

use crate::{
    error::AppError,
    models::security_event::{EventMetadata, SecurityEvent, SecurityEventType},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::VecDeque;
use std::sync::RwLock;
use uuid::Uuid;

/// 安全事件的持久化副本
#[async_trait]
pub trait SecurityEventRepository: Send + Sync {
    async fn insert(&self, event: &SecurityEvent) -> Result<(), AppError>;

    /// 时间范围内的事件，按时间升序
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, AppError>;

    async fn count_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, AppError>;

    /// 某个用户（user_id 或 email）最近的事件，按时间降序
    async fn recent_by_subject(
        &self,
        subject: &str,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError>;

    /// 删除早于 `cutoff` 的事件，返回删除数量
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[derive(sqlx::FromRow)]
struct SecurityEventRow {
    id: Uuid,
    event_type: String,
    success: bool,
    user_id: Option<String>,
    email: Option<String>,
    ip_address: String,
    user_agent: String,
    metadata: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<SecurityEventRow> for SecurityEvent {
    type Error = AppError;

    fn try_from(row: SecurityEventRow) -> Result<Self, Self::Error> {
        let event_type: SecurityEventType = row.event_type.parse().map_err(AppError::Internal)?;
        let metadata = match row.metadata {
            serde_json::Value::Object(map) => map,
            _ => EventMetadata::new(),
        };
        Ok(SecurityEvent {
            id: row.id,
            event_type,
            success: row.success,
            user_id: row.user_id,
            email: row.email,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            timestamp: row.occurred_at,
            metadata,
        })
    }
}

pub struct PgSecurityEventRepository {
    db: PgPool,
}

impl PgSecurityEventRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SecurityEventRepository for PgSecurityEventRepository {
    async fn insert(&self, event: &SecurityEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO security_events (
                id, event_type, success, user_id, email, ip_address, user_agent, metadata, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(event.success)
        .bind(&event.user_id)
        .bind(&event.email)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(serde_json::Value::Object(event.metadata.clone()))
        .bind(event.timestamp)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        let rows = sqlx::query_as::<_, SecurityEventRow>(
            r#"
            SELECT * FROM security_events
            WHERE occurred_at >= $1 AND occurred_at <= $2
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(SecurityEvent::try_from).collect()
    }

    async fn count_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, AppError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM security_events WHERE occurred_at >= $1 AND occurred_at <= $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?
        .get(0);

        Ok(count)
    }

    async fn recent_by_subject(
        &self,
        subject: &str,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        let rows = sqlx::query_as::<_, SecurityEventRow>(
            r#"
            SELECT * FROM security_events
            WHERE user_id = $1 OR (user_id IS NULL AND email = $1)
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(subject)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(SecurityEvent::try_from).collect()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM security_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// 内存仓库默认保留的事件数
pub const DEFAULT_MEMORY_EVENT_CAPACITY: usize = 10_000;

/// 无数据库时使用的内存仓库
///
/// 超过容量时丢弃最早的事件
pub struct MemorySecurityEventRepository {
    events: RwLock<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl Default for MemorySecurityEventRepository {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_EVENT_CAPACITY)
    }
}

impl MemorySecurityEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, VecDeque<SecurityEvent>>, AppError> {
        self.events
            .read()
            .map_err(|_| AppError::internal_error("security event store poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, VecDeque<SecurityEvent>>, AppError> {
        self.events
            .write()
            .map_err(|_| AppError::internal_error("security event store poisoned"))
    }
}

#[async_trait]
impl SecurityEventRepository for MemorySecurityEventRepository {
    async fn insert(&self, event: &SecurityEvent) -> Result<(), AppError> {
        let mut events = self.write()?;
        events.push_back(event.clone());
        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        let mut events: Vec<SecurityEvent> = self
            .read()?
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn count_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, AppError> {
        Ok(self
            .read()?
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .count() as i64)
    }

    async fn recent_by_subject(
        &self,
        subject: &str,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        let mut events: Vec<SecurityEvent> = self
            .read()?
            .iter()
            .filter(|e| e.subject() == Some(subject))
            .cloned()
            .collect();
        // 稳定排序，同一时刻按插入顺序倒序
        events.reverse();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut events = self.write()?;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(email: &str, at: DateTime<Utc>, success: bool) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            event_type: SecurityEventType::LoginAttempt,
            success,
            user_id: None,
            email: Some(email.to_string()),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test".to_string(),
            timestamp: at,
            metadata: EventMetadata::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_range_and_count() {
        let repo = MemorySecurityEventRepository::new();
        let now = Utc::now();
        repo.insert(&event("a@b.com", now - Duration::hours(2), false)).await.unwrap();
        repo.insert(&event("a@b.com", now, true)).await.unwrap();

        let start = now - Duration::hours(1);
        let events = repo.query_range(start, now).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
        assert_eq!(repo.count_range(start, now).await.unwrap(), 1);
        assert_eq!(repo.count_range(now - Duration::days(1), now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_recent_by_subject_newest_first() {
        let repo = MemorySecurityEventRepository::new();
        let now = Utc::now();
        for i in 0..5 {
            repo.insert(&event("a@b.com", now + Duration::seconds(i), i % 2 == 0))
                .await
                .unwrap();
        }
        repo.insert(&event("other@b.com", now, true)).await.unwrap();

        let recent = repo.recent_by_subject("a@b.com", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, now + Duration::seconds(4));
        assert!(recent.iter().all(|e| e.email.as_deref() == Some("a@b.com")));
    }

    #[tokio::test]
    async fn test_memory_capacity_drops_oldest() {
        let repo = MemorySecurityEventRepository::with_capacity(3);
        let now = Utc::now();
        for i in 0..5 {
            repo.insert(&event("a@b.com", now + Duration::seconds(i), true))
                .await
                .unwrap();
        }
        assert_eq!(repo.len(), 3);

        let events = repo.query_range(now, now + Duration::seconds(10)).await.unwrap();
        assert_eq!(events[0].timestamp, now + Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_memory_prune_before() {
        let repo = MemorySecurityEventRepository::new();
        let now = Utc::now();
        repo.insert(&event("a@b.com", now - Duration::days(100), false)).await.unwrap();
        repo.insert(&event("a@b.com", now, true)).await.unwrap();

        assert_eq!(repo.prune_before(now - Duration::days(90)).await.unwrap(), 1);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_row_with_unknown_type_is_rejected() {
        let row = SecurityEventRow {
            id: Uuid::new_v4(),
            event_type: "bogus".to_string(),
            success: true,
            user_id: None,
            email: None,
            ip_address: "unknown".to_string(),
            user_agent: "unknown".to_string(),
            metadata: serde_json::json!({}),
            occurred_at: Utc::now(),
        };
        assert!(SecurityEvent::try_from(row).is_err());
    }
}
