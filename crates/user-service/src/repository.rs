//! 用户资料仓储
//!
//! email / phone 在表上有唯一约束，冲突映射为校验错误。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use walletwave_shared::cache_aside::DurableSource;
use walletwave_shared::error::{Result, WaveError};

use crate::models::{NewProfile, Profile};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// 写入新资料，owner_id 由数据库分配
    async fn insert(&self, new: &NewProfile) -> Result<Profile>;

    async fn find_by_owner(&self, owner_id: i64) -> Result<Option<Profile>>;

    /// 整体覆盖资料字段，资料不存在时返回 `None`
    async fn update(&self, owner_id: i64, profile: &NewProfile) -> Result<Option<Profile>>;
}

fn map_unique_violation(e: sqlx::Error) -> WaveError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            WaveError::Validation("email 或 phone 已被其他用户使用".to_string())
        }
        _ => WaveError::Database(e),
    }
}

// ==================== PostgreSQL 实现 ====================

pub struct PgProfileRepository {
    pool: PgPool,
}

impl PgProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn insert(&self, new: &NewProfile) -> Result<Profile> {
        sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO owner_profiles (name, email, phone, age, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING owner_id, name, email, phone, age, created_at, updated_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(new.age)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)
    }

    async fn find_by_owner(&self, owner_id: i64) -> Result<Option<Profile>> {
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

    async fn update(&self, owner_id: i64, profile: &NewProfile) -> Result<Option<Profile>> {
        sqlx::query_as::<_, Profile>(
            r#"
            UPDATE owner_profiles
            SET name = $2, email = $3, phone = $4, age = $5, updated_at = NOW()
            WHERE owner_id = $1
            RETURNING owner_id, name, email, phone, age, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(profile.age)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)
    }
}

// ==================== 内存实现 ====================

/// 内存资料仓储，开发环境与跨服务流程测试使用
#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: DashMap<i64, Profile>,
    next_id: AtomicI64,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn ensure_contact_unique(&self, owner_id: Option<i64>, candidate: &NewProfile) -> Result<()> {
        let taken = self.profiles.iter().any(|p| {
            Some(p.owner_id) != owner_id
                && ((candidate.email.is_some() && p.email == candidate.email)
                    || (candidate.phone.is_some() && p.phone == candidate.phone))
        });
        if taken {
            return Err(WaveError::Validation(
                "email 或 phone 已被其他用户使用".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn insert(&self, new: &NewProfile) -> Result<Profile> {
        self.ensure_contact_unique(None, new)?;

        let now = Utc::now();
        let profile = Profile {
            owner_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: new.name.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
            age: new.age,
            created_at: now,
            updated_at: now,
        };
        self.profiles.insert(profile.owner_id, profile.clone());
        Ok(profile)
    }

    async fn find_by_owner(&self, owner_id: i64) -> Result<Option<Profile>> {
        Ok(self.profiles.get(&owner_id).map(|p| p.clone()))
    }

    async fn update(&self, owner_id: i64, profile: &NewProfile) -> Result<Option<Profile>> {
        self.ensure_contact_unique(Some(owner_id), profile)?;

        let Some(mut existing) = self.profiles.get_mut(&owner_id) else {
            return Ok(None);
        };
        existing.name = profile.name.clone();
        existing.email = profile.email.clone();
        existing.phone = profile.phone.clone();
        existing.age = profile.age;
        existing.updated_at = Utc::now();
        Ok(Some(existing.clone()))
    }
}

/// 旁路缓存的回源适配
pub struct ProfileSource {
    repo: Arc<dyn ProfileRepository>,
}

impl ProfileSource {
    pub fn new(repo: Arc<dyn ProfileRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DurableSource<Profile> for ProfileSource {
    async fn load(&self, owner_id: i64) -> Result<Option<Profile>> {
        self.repo.find_by_owner(owner_id).await
    }
}
