//! 用户资料模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walletwave_shared::cache_aside::CacheProjection;

/// 用户资料
///
/// 缓存中的 JSON 形状与通知服务的只读投影一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub owner_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub age: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheProjection for Profile {
    const ENTITY: &'static str = "profile";

    fn owner_id(&self) -> i64 {
        self.owner_id
    }
}

/// 注册请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub age: i32,
}

/// 资料修改，`None` 表示保持原值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none() && self.age.is_none()
    }

    /// 将修改应用到现有资料上，得到待校验的完整资料
    pub fn apply_to(&self, profile: &Profile) -> NewProfile {
        NewProfile {
            name: self.name.clone().unwrap_or_else(|| profile.name.clone()),
            email: self.email.clone().or_else(|| profile.email.clone()),
            phone: self.phone.clone().or_else(|| profile.phone.clone()),
            age: self.age.unwrap_or(profile.age),
        }
    }
}
