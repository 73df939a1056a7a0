//! 用户显示名解析
//!
//! 用户资料由 user-service 写入 `owner_profiles` 表和 `profile:{ownerId}` 缓存。
//! 本服务只读：先查缓存，未命中时回源数据库，避免注册事件先于缓存写入到达时丢失欢迎通知。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use walletwave_shared::cache_aside::{CacheProjection, DurableSource};
use walletwave_shared::error::Result;

/// 用户资料投影
///
/// 字段与 user-service 写入缓存的 JSON 保持一致，两边回填的缓存内容可以互相读取。
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

/// 从 `owner_profiles` 只读加载用户资料
pub struct PgProfileSource {
    pool: PgPool,
}

impl PgProfileSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableSource<Profile> for PgProfileSource {
    async fn load(&self, owner_id: i64) -> Result<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            SELECT owner_id, name, email, phone, age, created_at, updated_at
            FROM owner_profiles
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }
}

/// 内存用户资料源，测试使用
#[derive(Default)]
pub struct InMemoryProfileSource {
    profiles: DashMap<i64, Profile>,
}

impl InMemoryProfileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, owner_id: i64, name: &str) {
        let now = Utc::now();
        self.profiles.insert(
            owner_id,
            Profile {
                owner_id,
                name: name.to_string(),
                email: Some(format!("user{owner_id}@walletwave.test")),
                phone: None,
                age: 30,
                created_at: now,
                updated_at: now,
            },
        );
    }
}

#[async_trait]
impl DurableSource<Profile> for InMemoryProfileSource {
    async fn load(&self, owner_id: i64) -> Result<Option<Profile>> {
        Ok(self.profiles.get(&owner_id).map(|p| p.clone()))
    }
}
