//! 一次性令牌（邮箱验证、密码重置）
//!
//! 存储中只出现令牌的 SHA-256 哈希。`(user_id, purpose)` 二级索引保证
//! 每个用户每种用途最多一个有效令牌，签发新令牌会让旧令牌失效。

use crate::{
    cache::{keys, CacheClient, Command, StoreError},
    clock::SharedClock,
    config::SecurityConfig,
    error::AuthError,
    models::token::{AuthToken, TokenPurpose},
};
use chrono::Duration as ChronoDuration;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use std::time::Duration;

pub const TOKEN_LENGTH: usize = 48;

/// 令牌哈希（SHA-256，十六进制）
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct TokenService {
    cache: CacheClient,
    clock: SharedClock,
    email_verification_ttl: ChronoDuration,
    password_reset_ttl: ChronoDuration,
}

impl TokenService {
    pub fn new(cache: CacheClient, clock: SharedClock, config: &SecurityConfig) -> Self {
        Self {
            cache,
            clock,
            email_verification_ttl: ChronoDuration::seconds(
                config.email_verification_token_ttl_secs as i64,
            ),
            password_reset_ttl: ChronoDuration::seconds(config.password_reset_token_ttl_secs as i64),
        }
    }

    fn ttl_for(&self, purpose: TokenPurpose) -> ChronoDuration {
        match purpose {
            TokenPurpose::EmailVerification => self.email_verification_ttl,
            TokenPurpose::PasswordReset => self.password_reset_ttl,
        }
    }

    /// 签发并缓存新令牌
    pub async fn issue_token(
        &self,
        user_id: &str,
        email: &str,
        purpose: TokenPurpose,
    ) -> Result<AuthToken, AuthError> {
        let now = self.clock.now();
        let token = AuthToken {
            token: generate_token(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            purpose,
            expires_at: now + self.ttl_for(purpose),
            created_at: now,
        };

        self.cache_token(&token).await.map_err(|e| {
            tracing::error!(%user_id, %purpose, error = %e, "Failed to cache token");
            AuthError::service_unavailable()
        })?;

        Ok(token)
    }

    /// 缓存令牌，TTL 为剩余有效期；同用户同用途的旧令牌随之失效
    pub async fn cache_token(&self, token: &AuthToken) -> Result<(), StoreError> {
        let now = self.clock.now();
        let remaining_ms = (token.expires_at - now).num_milliseconds();
        if remaining_ms <= 0 {
            tracing::debug!(user_id = %token.user_id, purpose = %token.purpose, "Token already expired, not cached");
            return Ok(());
        }
        let ttl = Duration::from_millis(remaining_ms as u64);

        self.invalidate_user_token(&token.user_id, token.purpose).await?;

        let token_hash = hash_token(&token.token);
        let stored = AuthToken {
            token: token_hash.clone(),
            ..token.clone()
        };
        let raw = serde_json::to_string(&stored)?;

        self.cache
            .pipeline(vec![
                Command::Set {
                    key: keys::token(token.purpose, &token_hash),
                    value: raw,
                    ttl: Some(ttl),
                },
                Command::Set {
                    key: keys::user_token(&token.user_id, token.purpose),
                    value: token_hash,
                    ttl: Some(ttl),
                },
            ])
            .await?;

        tracing::debug!(user_id = %token.user_id, purpose = %token.purpose, "Token cached");
        Ok(())
    }

    /// 读取令牌记录
    pub async fn get_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<AuthToken>, StoreError> {
        let stored: Option<AuthToken> = self
            .cache
            .get_json(&keys::token(purpose, &hash_token(token)))
            .await?;

        Ok(stored.map(|record| AuthToken {
            token: token.to_string(),
            ..record
        }))
    }

    /// 校验令牌
    pub async fn verify_token(&self, token: &str, purpose: TokenPurpose) -> Result<AuthToken, AuthError> {
        let record = self.get_token(token, purpose).await.map_err(|e| {
            tracing::warn!(%purpose, error = %e, "Token store unavailable");
            AuthError::service_unavailable()
        })?;

        match record {
            None => Err(AuthError::token_invalid()),
            Some(record) if record.is_expired(self.clock.now()) => Err(AuthError::token_expired()),
            Some(record) => Ok(record),
        }
    }

    /// 校验并立即失效（单次使用）
    pub async fn consume_token(&self, token: &str, purpose: TokenPurpose) -> Result<AuthToken, AuthError> {
        let record = self.verify_token(token, purpose).await?;
        let existed = self.invalidate_token(token, purpose).await.map_err(|e| {
            tracing::warn!(%purpose, error = %e, "Failed to invalidate consumed token");
            AuthError::service_unavailable()
        })?;
        // 并发消费时只有真正删除令牌的一方成功
        if !existed {
            tracing::warn!(%purpose, "Token already consumed");
            return Err(AuthError::token_invalid());
        }
        Ok(record)
    }

    /// 使单个令牌失效，返回令牌是否存在
    pub async fn invalidate_token(&self, token: &str, purpose: TokenPurpose) -> Result<bool, StoreError> {
        let token_hash = hash_token(token);
        let key = keys::token(purpose, &token_hash);

        let stored: Option<AuthToken> = self.cache.get_json(&key).await?;
        let existed = self.cache.delete(&key).await?;

        if let Some(stored) = stored {
            let index = keys::user_token(&stored.user_id, purpose);
            if self.cache.get(&index).await?.as_deref() == Some(token_hash.as_str()) {
                self.cache.delete(&index).await?;
            }
        }

        Ok(existed)
    }

    /// 使某用户某用途的当前令牌失效
    pub async fn invalidate_user_token(
        &self,
        user_id: &str,
        purpose: TokenPurpose,
    ) -> Result<bool, StoreError> {
        let index = keys::user_token(user_id, purpose);
        let Some(token_hash) = self.cache.get(&index).await? else {
            return Ok(false);
        };

        self.cache
            .pipeline(vec![
                Command::Del {
                    key: keys::token(purpose, &token_hash),
                },
                Command::Del { key: index },
            ])
            .await?;

        tracing::debug!(%user_id, %purpose, "Previous token invalidated");
        Ok(true)
    }
}
