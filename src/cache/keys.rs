//! 缓存键命名空间

use crate::models::token::TokenPurpose;

pub fn rate_limit(action: &str, identifier: &str) -> String {
    format!("rate_limit:{action}:{identifier}")
}

pub fn login_attempts(email: &str) -> String {
    format!("login_attempts:{email}")
}

pub fn lockout(email: &str) -> String {
    format!("lockout:{email}")
}

/// 活跃锁定索引（有序集合，email -> 锁定时间毫秒）
pub fn active_lockouts() -> String {
    "lockouts:active".to_string()
}

/// 令牌键只包含令牌的哈希，不落明文
pub fn token(purpose: TokenPurpose, token_hash: &str) -> String {
    format!("token:{}:{token_hash}", purpose.as_str())
}

pub fn user_token(user_id: &str, purpose: TokenPurpose) -> String {
    format!("user_token:{user_id}:{}", purpose.as_str())
}

pub fn security_events(subject: &str) -> String {
    format!("security_events:{subject}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(rate_limit("login", "1.2.3.4"), "rate_limit:login:1.2.3.4");
        assert_eq!(lockout("a@b.com"), "lockout:a@b.com");
        assert_eq!(
            token(TokenPurpose::PasswordReset, "abc"),
            "token:password_reset:abc"
        );
        assert_eq!(
            user_token("u1", TokenPurpose::EmailVerification),
            "user_token:u1:email_verification"
        );
    }
}
