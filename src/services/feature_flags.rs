//! 功能开关评估
//!
//! 评估顺序：
//! 1. 开关不存在或未启用 → false
//! 2. 设置了环境限制且当前环境不在其中 → false
//! 3. user_id 在 enabled_users 中 → true
//! 4. user_role 在 enabled_roles 中 → true
//! 5. rollout > 0 时按分桶决定：`bucket = hash(name + subject) % 100 + 1`，`bucket <= rollout`
//! 6. 其余 → false
//!
//! 分桶哈希固定为 32 位滚动哈希：种子 0，逐个 UTF-16 码元执行
//! `h = h * 31 + c`（i32 环绕），取绝对值后对 100 取模。
//!
//! 开关来源不可用时按关闭处理（fail-closed）。

use crate::{
    clock::SharedClock,
    error::{AppError, AuthError},
    models::feature_flag::{FeatureFlag, FlagContext, FlagUpdate},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub const FLAG_LOGIN: &str = "login_enabled";
pub const FLAG_REGISTRATION: &str = "registration_enabled";
pub const FLAG_PASSWORD_RESET: &str = "password_reset_enabled";
pub const FLAG_EMAIL_VERIFICATION: &str = "email_verification_enabled";
pub const FLAG_SUSPICIOUS_ACTIVITY_DETECTION: &str = "suspicious_activity_detection";

/// 受保护动作对应的开关
pub fn flag_for_action(action: &str) -> Option<&'static str> {
    match action {
        "login" => Some(FLAG_LOGIN),
        "register" => Some(FLAG_REGISTRATION),
        "password_reset" => Some(FLAG_PASSWORD_RESET),
        "email_verification" => Some(FLAG_EMAIL_VERIFICATION),
        _ => None,
    }
}

/// 32 位滚动哈希
pub fn rollout_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

/// 灰度分桶，取值 1..=100
pub fn rollout_bucket(flag_name: &str, subject: &str) -> u32 {
    let hash = rollout_hash(&format!("{flag_name}{subject}"));
    hash.unsigned_abs() % 100 + 1
}

/// 对单个开关求值（纯函数）
pub fn evaluate(flag: &FeatureFlag, ctx: &FlagContext) -> bool {
    if !flag.enabled {
        return false;
    }

    if !flag.environment.is_empty() && !flag.environment.contains(&ctx.environment) {
        return false;
    }

    if let Some(user_id) = &ctx.user_id {
        if flag.enabled_users.contains(user_id) {
            return true;
        }
    }

    if let Some(role) = &ctx.user_role {
        if flag.enabled_roles.contains(role) {
            return true;
        }
    }

    if flag.rollout_percentage > 0 {
        let bucket = rollout_bucket(&flag.name, ctx.rollout_subject());
        return bucket <= u32::from(flag.rollout_percentage);
    }

    false
}

/// 开关的权威来源
#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<FeatureFlag>, AppError>;
    async fn load_all(&self) -> Result<Vec<FeatureFlag>, AppError>;
    async fn save(&self, flag: &FeatureFlag) -> Result<(), AppError>;
}

/// 进程内的默认开关表
#[derive(Default)]
pub struct StaticFlagSource {
    flags: RwLock<BTreeMap<String, FeatureFlag>>,
}

impl StaticFlagSource {
    pub fn new(flags: impl IntoIterator<Item = FeatureFlag>) -> Self {
        Self {
            flags: RwLock::new(flags.into_iter().map(|f| (f.name.clone(), f)).collect()),
        }
    }

    /// 内置默认开关
    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        Self::new([
            FeatureFlag::new(FLAG_LOGIN, "Allow password login", now).enabled(100),
            FeatureFlag::new(FLAG_REGISTRATION, "Allow new account registration", now).enabled(100),
            FeatureFlag::new(FLAG_PASSWORD_RESET, "Allow password reset requests", now).enabled(100),
            FeatureFlag::new(FLAG_EMAIL_VERIFICATION, "Allow email verification", now).enabled(100),
            FeatureFlag::new(
                FLAG_SUSPICIOUS_ACTIVITY_DETECTION,
                "Flag repeated login failures as suspicious activity",
                now,
            )
            .enabled(100),
        ])
    }
}

#[async_trait]
impl FlagSource for StaticFlagSource {
    async fn load(&self, name: &str) -> Result<Option<FeatureFlag>, AppError> {
        let flags = self
            .flags
            .read()
            .map_err(|_| AppError::internal_error("flag table poisoned"))?;
        Ok(flags.get(name).cloned())
    }

    async fn load_all(&self) -> Result<Vec<FeatureFlag>, AppError> {
        let flags = self
            .flags
            .read()
            .map_err(|_| AppError::internal_error("flag table poisoned"))?;
        Ok(flags.values().cloned().collect())
    }

    async fn save(&self, flag: &FeatureFlag) -> Result<(), AppError> {
        self.flags
            .write()
            .map_err(|_| AppError::internal_error("flag table poisoned"))?
            .insert(flag.name.clone(), flag.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    flag: FeatureFlag,
    expires_at: DateTime<Utc>,
}

pub struct FeatureFlagService {
    source: Arc<dyn FlagSource>,
    cache: DashMap<String, CacheEntry>,
    ttl: ChronoDuration,
    clock: SharedClock,
    environment: String,
}

impl FeatureFlagService {
    pub fn new(
        source: Arc<dyn FlagSource>,
        clock: SharedClock,
        cache_ttl_secs: u64,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl: ChronoDuration::seconds(cache_ttl_secs as i64),
            clock,
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// 当前环境下的空白评估上下文
    pub fn context(&self) -> FlagContext {
        FlagContext::new(self.environment.clone())
    }

    fn cache_put(&self, flag: FeatureFlag) {
        let expires_at = self.clock.now() + self.ttl;
        self.cache
            .insert(flag.name.clone(), CacheEntry { flag, expires_at });
    }

    fn cache_get(&self, name: &str) -> Option<FeatureFlag> {
        let now = self.clock.now();
        let entry = self.cache.get(name)?;
        if entry.expires_at > now {
            Some(entry.flag.clone())
        } else {
            None
        }
    }

    /// 读取开关，优先使用缓存
    pub async fn get_flag(&self, name: &str) -> Result<Option<FeatureFlag>, AppError> {
        if let Some(flag) = self.cache_get(name) {
            return Ok(Some(flag));
        }

        let flag = self.source.load(name).await?;
        match &flag {
            Some(flag) => self.cache_put(flag.clone()),
            None => {
                self.cache.remove(name);
            }
        }
        Ok(flag)
    }

    /// 评估开关；来源异常时返回 false
    pub async fn is_enabled(&self, name: &str, ctx: &FlagContext) -> bool {
        match self.get_flag(name).await {
            Ok(Some(flag)) => {
                let enabled = evaluate(&flag, ctx);
                tracing::debug!(flag = %name, enabled, "Feature flag evaluated");
                enabled
            }
            Ok(None) => {
                tracing::debug!(flag = %name, "Unknown feature flag, treated as disabled");
                false
            }
            Err(e) => {
                tracing::warn!(flag = %name, error = %e, "Feature flag source unavailable, treating as disabled");
                false
            }
        }
    }

    /// 更新开关，写穿来源并刷新缓存
    pub async fn update_flag(&self, name: &str, update: FlagUpdate) -> Result<FeatureFlag, AppError> {
        if let Some(rollout) = update.rollout_percentage {
            if rollout > 100 {
                return Err(AuthError::validation("Rollout percentage must be between 0 and 100")
                    .with_field("rolloutPercentage")
                    .into());
            }
        }

        let mut flag = self.source.load(name).await?.ok_or_else(|| {
            AuthError::validation(format!("Unknown feature flag: {name}")).with_field("name")
        })?;

        if let Some(enabled) = update.enabled {
            flag.enabled = enabled;
        }
        if let Some(rollout) = update.rollout_percentage {
            flag.rollout_percentage = rollout;
        }
        if let Some(users) = update.enabled_users {
            flag.enabled_users = users;
        }
        if let Some(roles) = update.enabled_roles {
            flag.enabled_roles = roles;
        }
        if let Some(environment) = update.environment {
            flag.environment = environment;
        }
        if let Some(description) = update.description {
            flag.description = description;
        }
        flag.updated_at = self.clock.now();

        self.source.save(&flag).await?;
        self.cache_put(flag.clone());

        tracing::info!(
            flag = %flag.name,
            enabled = flag.enabled,
            rollout = flag.rollout_percentage,
            "Feature flag updated"
        );
        Ok(flag)
    }

    /// 所有开关（直接读取来源）
    pub async fn get_all_flags(&self) -> Result<Vec<FeatureFlag>, AppError> {
        self.source.load_all().await
    }

    /// 预热缓存，返回加载的开关数量
    pub async fn warm_up(&self) -> Result<usize, AppError> {
        let flags = self.source.load_all().await?;
        let count = flags.len();
        for flag in flags {
            self.cache_put(flag);
        }
        tracing::info!(count, "Feature flag cache warmed up");
        Ok(count)
    }

    /// 清理过期缓存项，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.expires_at > now);
        before - self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollout_hash_is_pinned() {
        assert_eq!(rollout_hash(""), 0);
        assert_eq!(rollout_hash("a"), 97);
        assert_eq!(rollout_hash("ab"), 97 * 31 + 98);
        // 长输入会环绕，结果仍然确定
        let long = "x".repeat(1000);
        assert_eq!(rollout_hash(&long), rollout_hash(&long));
    }

    #[test]
    fn test_bucket_range() {
        for i in 0..1000 {
            let bucket = rollout_bucket("flag", &format!("user-{i}"));
            assert!((1..=100).contains(&bucket));
        }
    }

    #[test]
    fn test_flag_for_action() {
        assert_eq!(flag_for_action("login"), Some(FLAG_LOGIN));
        assert_eq!(flag_for_action("delete_everything"), None);
    }

    #[test]
    fn test_evaluate_order() {
        let now = Utc::now();
        let ctx = FlagContext::new("production").with_user("u1").with_role("admin");

        let disabled = FeatureFlag::new("f", "", now);
        assert!(!evaluate(&disabled, &ctx));

        let wrong_env = FeatureFlag::new("f", "", now)
            .enabled(100)
            .for_environments(["staging"]);
        assert!(!evaluate(&wrong_env, &ctx));

        let mut by_user = FeatureFlag::new("f", "", now).enabled(0);
        by_user.enabled_users.insert("u1".to_string());
        assert!(evaluate(&by_user, &ctx));

        let by_role = FeatureFlag::new("f", "", now).enabled(0).for_roles(["admin"]);
        assert!(evaluate(&by_role, &ctx));

        let zero = FeatureFlag::new("f", "", now).enabled(0);
        assert!(!evaluate(&zero, &ctx));

        let full = FeatureFlag::new("f", "", now).enabled(100);
        assert!(evaluate(&full, &FlagContext::new("anything")));
    }
}
