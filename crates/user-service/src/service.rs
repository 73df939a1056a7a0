//! 用户资料服务
//!
//! 注册：校验 -> 落库并覆盖缓存 -> 尽力发布 `owner.registered`。
//! 注册事件发布失败只记录日志，资料已经保存，不回滚。

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{info, instrument, warn};
use walletwave_shared::cache::ProjectionCache;
use walletwave_shared::cache_aside::{CacheAside, CacheProjection};
use walletwave_shared::error::WaveError;
use walletwave_shared::events::OwnerRegistered;
use walletwave_shared::kafka::{EventPublisher, publish_json, topics};

use crate::error::{Result, UserError};
use crate::models::{NewProfile, Profile, ProfilePatch};
use crate::repository::{ProfileRepository, ProfileSource};

pub const MIN_AGE: i32 = 18;
const NAME_MAX_LEN: usize = 100;

static PHONE_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$"));

static EMAIL_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

fn pattern(compiled: &'static std::result::Result<Regex, regex::Error>) -> Result<&'static Regex> {
    compiled
        .as_ref()
        .map_err(|e| UserError::Shared(WaveError::Internal(format!("校验规则无效: {e}"))))
}

pub struct UserService {
    repo: Arc<dyn ProfileRepository>,
    profiles: CacheAside<Profile>,
    publisher: Arc<dyn EventPublisher>,
}

impl UserService {
    pub fn new(
        repo: Arc<dyn ProfileRepository>,
        cache: Arc<dyn ProjectionCache>,
        publisher: Arc<dyn EventPublisher>,
        cache_ttl: Duration,
    ) -> Self {
        let profiles = CacheAside::new(cache, Arc::new(ProfileSource::new(repo.clone())), cache_ttl);
        Self {
            repo,
            profiles,
            publisher,
        }
    }

    /// 注册新用户
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn register(&self, new: NewProfile) -> Result<Profile> {
        let new = validate(new)?;
        let profile = self.profiles.put(self.repo.insert(&new)).await?;
        info!(owner_id = profile.owner_id, "用户已注册");

        let event = OwnerRegistered {
            owner_id: profile.owner_id,
        };
        if let Err(e) = publish_json(
            self.publisher.as_ref(),
            topics::OWNER_REGISTERED,
            &profile.owner_id.to_string(),
            &event,
        )
        .await
        {
            warn!(owner_id = profile.owner_id, error = %e, "发布 owner.registered 失败");
        }

        Ok(profile)
    }

    /// 修改资料，落库成功后覆盖缓存
    #[instrument(skip(self, patch))]
    pub async fn update_profile(&self, owner_id: i64, patch: ProfilePatch) -> Result<Profile> {
        let existing = self
            .repo
            .find_by_owner(owner_id)
            .await?
            .ok_or(UserError::ProfileNotFound { owner_id })?;
        if patch.is_empty() {
            return Ok(existing);
        }

        let merged = validate(patch.apply_to(&existing))?;
        let updated = self
            .profiles
            .put(async {
                match self.repo.update(owner_id, &merged).await {
                    Ok(Some(profile)) => Ok(profile),
                    Ok(None) => Err(WaveError::not_found(Profile::ENTITY, owner_id)),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| match e {
                WaveError::NotFound { .. } => UserError::ProfileNotFound { owner_id },
                other => UserError::Shared(other),
            })?;

        info!(owner_id, "用户资料已更新");
        Ok(updated)
    }

    pub async fn get_profile(&self, owner_id: i64) -> Result<Profile> {
        self.profiles
            .get(owner_id)
            .await?
            .ok_or(UserError::ProfileNotFound { owner_id })
    }
}

/// 校验并规范化资料：去掉首尾空白，空字符串视为未填写
fn validate(new: NewProfile) -> Result<NewProfile> {
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(UserError::InvalidProfile("name 不能为空".to_string()));
    }
    if name.chars().count() > NAME_MAX_LEN {
        return Err(UserError::InvalidProfile(format!(
            "name 不能超过 {NAME_MAX_LEN} 个字符"
        )));
    }
    if new.age < MIN_AGE {
        return Err(UserError::InvalidProfile(format!(
            "age 必须不小于 {MIN_AGE}: {}",
            new.age
        )));
    }

    let email = normalize(new.email);
    let phone = normalize(new.phone);
    if email.is_none() && phone.is_none() {
        return Err(UserError::InvalidProfile(
            "email 和 phone 至少填写一项".to_string(),
        ));
    }
    if let Some(email) = &email
        && !pattern(&EMAIL_PATTERN)?.is_match(email)
    {
        return Err(UserError::InvalidProfile(format!("email 格式错误: {email}")));
    }
    if let Some(phone) = &phone
        && !pattern(&PHONE_PATTERN)?.is_match(phone)
    {
        return Err(UserError::InvalidProfile(format!(
            "phone 必须为 10 位数字: {phone}"
        )));
    }

    Ok(NewProfile {
        name,
        email,
        phone,
        age: new.age,
    })
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
