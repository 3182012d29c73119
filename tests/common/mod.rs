//! 测试公共模块
//! 提供测试状态、手动时钟与故障注入用的存储

#![allow(dead_code)]

use async_trait::async_trait;
use auth_guard::{
    cache::{CacheStore, Command, MemoryStore, Reply, StoreError},
    clock::{ManualClock, SharedClock},
    config::AppConfig,
    error::AppError,
    middleware::AppState,
    models::security_event::{RequestContext, SecurityEvent},
    repository::{MemorySecurityEventRepository, SecurityEventRepository},
    services::{FlagSource, StaticFlagSource},
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// 固定的测试起点，便于断言时间
pub fn test_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
}

/// 创建测试配置
pub fn create_test_config() -> AppConfig {
    let mut config = AppConfig::with_defaults().expect("default config is valid");
    config.server.addr = "127.0.0.1:0".to_string();
    config.logging.level = "debug".to_string();
    config.logging.format = "pretty".to_string();
    config.flags.environment = "test".to_string();
    config
}

/// 测试上下文
pub struct TestContext {
    pub state: Arc<AppState>,
    pub clock: ManualClock,
    pub events: Arc<MemorySecurityEventRepository>,
    pub flag_source: Arc<StaticFlagSource>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let clock = ManualClock::new(test_start_time());
        let shared: SharedClock = Arc::new(clock.clone());
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::with_clock(shared.clone()));
        Self::build(config, clock, store)
    }

    /// 使用给定的缓存存储
    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self::with_config_and_store(create_test_config(), store)
    }

    pub fn with_config_and_store(config: AppConfig, store: Arc<dyn CacheStore>) -> Self {
        let clock = ManualClock::new(test_start_time());
        Self::build(config, clock, store)
    }

    fn build(config: AppConfig, clock: ManualClock, store: Arc<dyn CacheStore>) -> Self {
        let shared: SharedClock = Arc::new(clock.clone());
        let events = Arc::new(MemorySecurityEventRepository::new());
        let flag_source = Arc::new(StaticFlagSource::with_defaults(test_start_time()));

        let state = Arc::new(AppState::new(
            config,
            None,
            store,
            events.clone() as Arc<dyn SecurityEventRepository>,
            flag_source.clone() as Arc<dyn FlagSource>,
            shared,
        ));

        Self {
            state,
            clock,
            events,
            flag_source,
        }
    }

    pub fn router(&self) -> axum::Router {
        auth_guard::routes::create_router(self.state.clone())
    }

    /// 仓库中的全部事件，按时间升序
    pub async fn all_events(&self) -> Vec<SecurityEvent> {
        self.events
            .query_range(
                test_start_time() - chrono::Duration::days(365),
                test_start_time() + chrono::Duration::days(365),
            )
            .await
            .unwrap()
    }
}

pub fn client_context() -> RequestContext {
    RequestContext::new("203.0.113.7", "integration-test/1.0")
}

/// 永远不可用的缓存存储
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn execute(&self, _command: Command) -> Result<Reply, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// 响应极慢的缓存存储，用于触发客户端超时
pub struct SlowStore {
    pub delay: Duration,
}

#[async_trait]
impl CacheStore for SlowStore {
    async fn execute(&self, _command: Command) -> Result<Reply, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(Reply::Nil)
    }
}

/// 永远写入失败的事件仓库
pub struct FailingEventRepository;

#[async_trait]
impl SecurityEventRepository for FailingEventRepository {
    async fn insert(&self, _event: &SecurityEvent) -> Result<(), AppError> {
        Err(AppError::internal_error("database is down"))
    }

    async fn query_range(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        Err(AppError::internal_error("database is down"))
    }

    async fn count_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<i64, AppError> {
        Err(AppError::internal_error("database is down"))
    }

    async fn recent_by_subject(
        &self,
        _subject: &str,
        _limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        Err(AppError::internal_error("database is down"))
    }

    async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        Err(AppError::internal_error("database is down"))
    }
}

/// 调用永不返回的事件仓库
pub struct StalledEventRepository;

#[async_trait]
impl SecurityEventRepository for StalledEventRepository {
    async fn insert(&self, _event: &SecurityEvent) -> Result<(), AppError> {
        std::future::pending().await
    }

    async fn query_range(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        std::future::pending().await
    }

    async fn count_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<i64, AppError> {
        std::future::pending().await
    }

    async fn recent_by_subject(
        &self,
        _subject: &str,
        _limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        std::future::pending().await
    }

    async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        std::future::pending().await
    }
}

/// 使用给定事件仓库组装应用状态
pub fn state_with_event_repo(config: AppConfig, repo: Arc<dyn SecurityEventRepository>) -> Arc<AppState> {
    let shared: SharedClock = Arc::new(ManualClock::new(test_start_time()));
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::with_clock(shared.clone()));
    let flag_source: Arc<dyn FlagSource> = Arc::new(StaticFlagSource::with_defaults(test_start_time()));
    Arc::new(AppState::new(config, None, store, repo, flag_source, shared))
}

/// 每条命令前让出执行权的存储，用于交错并发调用
pub struct YieldingStore {
    pub inner: MemoryStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl CacheStore for YieldingStore {
    async fn execute(&self, command: Command) -> Result<Reply, StoreError> {
        tokio::task::yield_now().await;
        self.inner.execute(command).await
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.pipeline(commands).await
    }
}
