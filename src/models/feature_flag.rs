//! Feature flag models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 功能开关
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    /// 0-100
    pub rollout_percentage: u8,
    #[serde(default)]
    pub enabled_users: BTreeSet<String>,
    #[serde(default)]
    pub enabled_roles: BTreeSet<String>,
    /// 允许的环境名；为空表示所有环境
    #[serde(default)]
    pub environment: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureFlag {
    pub fn new(name: impl Into<String>, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            rollout_percentage: 0,
            enabled_users: BTreeSet::new(),
            enabled_roles: BTreeSet::new(),
            environment: BTreeSet::new(),
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn enabled(mut self, rollout_percentage: u8) -> Self {
        self.enabled = true;
        self.rollout_percentage = rollout_percentage;
        self
    }

    pub fn for_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environment = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn for_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// 开关更新请求，未提供的字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    pub enabled: Option<bool>,
    pub rollout_percentage: Option<u8>,
    pub enabled_users: Option<BTreeSet<String>>,
    pub enabled_roles: Option<BTreeSet<String>>,
    pub environment: Option<BTreeSet<String>>,
    pub description: Option<String>,
}

/// 开关评估上下文
#[derive(Debug, Clone, Default)]
pub struct FlagContext {
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub email: Option<String>,
    pub environment: String,
    pub ip_address: Option<String>,
}

impl FlagContext {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// 灰度分桶使用的主体：user_id，其次 email，其次 IP
    pub fn rollout_subject(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.email.as_deref())
            .or(self.ip_address.as_deref())
            .unwrap_or("")
    }
}
