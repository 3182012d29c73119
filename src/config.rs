//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use crate::models::rate_limit::RateLimitRule;
use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
    /// 请求体大小上限（字节）
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（可选；缺省时安全事件只写入内存仓库）
    pub url: Option<Secret<String>>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
    /// 安全事件仓库单次调用超时（毫秒）
    pub query_timeout_ms: u64,
    /// 无数据库时内存仓库保留的事件上限
    pub memory_event_capacity: usize,
    /// 维护任务清理安全事件时保留的天数
    pub event_retention_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 单次存储调用超时（毫秒）
    pub op_timeout_ms: u64,
    /// 所有键的统一前缀
    pub key_prefix: String,
    /// 每个用户保留的最近安全事件条数
    pub security_events_max_per_user: usize,
    /// 最近事件列表的 TTL（秒）
    pub security_events_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 登录失败计数的 TTL（秒），每次失败都会续期
    pub login_attempts_ttl_secs: u64,
    /// 最大登录失败次数
    pub max_login_attempts: u32,
    /// 登录锁定持续时间（秒）
    pub lockout_duration_secs: u64,
    pub login_rate_limit: RateLimitRule,
    pub register_rate_limit: RateLimitRule,
    pub password_reset_rate_limit: RateLimitRule,
    pub email_verification_rate_limit: RateLimitRule,
    /// 是否信任 X-Forwarded-For / X-Real-IP 头
    pub trust_proxy: bool,
    /// 可疑聚集判定：窗口内失败次数阈值
    pub suspicious_failure_threshold: u64,
    /// 可疑聚集判定窗口（秒）
    pub suspicious_window_secs: u64,
    /// 令牌有效期（秒）
    pub email_verification_token_ttl_secs: u64,
    pub password_reset_token_ttl_secs: u64,
}

impl SecurityConfig {
    /// 按动作名取速率限制规则
    pub fn rule_for(&self, action: &str) -> Option<RateLimitRule> {
        match action {
            "login" => Some(self.login_rate_limit),
            "register" => Some(self.register_rate_limit),
            "password_reset" => Some(self.password_reset_rate_limit),
            "email_verification" => Some(self.email_verification_rate_limit),
            _ => None,
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsConfig {
    /// 开关缓存 TTL（秒）
    pub cache_ttl_secs: u64,
    /// 当前部署环境
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub flags: FlagsConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::builder()?
            .add_source(
                Environment::with_prefix("AUTH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 仅使用默认值构建配置（测试与本地运行）
    pub fn with_defaults() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::builder()?.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("server.body_limit_bytes", 64 * 1024)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("database.query_timeout_ms", 2000)?
            .set_default("database.memory_event_capacity", 10_000)?
            .set_default("database.event_retention_days", 90)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("cache.op_timeout_ms", 500)?
            .set_default("cache.key_prefix", "auth:")?
            .set_default("cache.security_events_max_per_user", 100)?
            .set_default("cache.security_events_ttl_secs", 30 * 24 * 3600)?
            .set_default("security.login_attempts_ttl_secs", 900)?
            .set_default("security.max_login_attempts", 5)?
            .set_default("security.lockout_duration_secs", 1800)?
            .set_default("security.login_rate_limit.limit", 5)?
            .set_default("security.login_rate_limit.window_secs", 900)?
            .set_default("security.register_rate_limit.limit", 3)?
            .set_default("security.register_rate_limit.window_secs", 3600)?
            .set_default("security.password_reset_rate_limit.limit", 3)?
            .set_default("security.password_reset_rate_limit.window_secs", 3600)?
            .set_default("security.email_verification_rate_limit.limit", 5)?
            .set_default("security.email_verification_rate_limit.window_secs", 3600)?
            .set_default("security.trust_proxy", true)?
            .set_default("security.suspicious_failure_threshold", 5)?
            .set_default("security.suspicious_window_secs", 900)?
            .set_default("security.email_verification_token_ttl_secs", 24 * 3600)?
            .set_default("security.password_reset_token_ttl_secs", 3600)?
            .set_default("flags.cache_ttl_secs", 300)?
            .set_default("flags.environment", "development")
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        if self.database.query_timeout_ms == 0
            || self.database.memory_event_capacity == 0
            || self.database.event_retention_days == 0
        {
            return Err(ConfigError::Message(
                "database query timeout, memory event capacity and event retention must be > 0"
                    .to_string(),
            ));
        }

        if self.cache.op_timeout_ms == 0 {
            return Err(ConfigError::Message("cache.op_timeout_ms must be > 0".to_string()));
        }

        if self.cache.security_events_max_per_user == 0 {
            return Err(ConfigError::Message(
                "cache.security_events_max_per_user must be > 0".to_string(),
            ));
        }

        if self.security.max_login_attempts < 1 || self.security.max_login_attempts > 20 {
            return Err(ConfigError::Message(
                "max_login_attempts must be between 1 and 20".to_string(),
            ));
        }

        if self.security.lockout_duration_secs == 0 {
            return Err(ConfigError::Message(
                "lockout_duration_secs must be > 0".to_string(),
            ));
        }

        for (name, rule) in [
            ("login", self.security.login_rate_limit),
            ("register", self.security.register_rate_limit),
            ("password_reset", self.security.password_reset_rate_limit),
            ("email_verification", self.security.email_verification_rate_limit),
        ] {
            if rule.limit == 0 || rule.window_secs == 0 {
                return Err(ConfigError::Message(format!(
                    "{name} rate limit must have limit > 0 and window_secs > 0"
                )));
            }
        }

        if self.flags.cache_ttl_secs == 0 {
            return Err(ConfigError::Message("flags.cache_ttl_secs must be > 0".to_string()));
        }

        Ok(())
    }
}
