//! 通知扇出服务
//!
//! 1. 通过旁路缓存解析相关用户的显示名（缓存未命中回源 owner_profiles）
//! 2. 任一方资料不存在时静默丢弃
//! 3. 按结算结果生成一条或两条通知，带去重键写入

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use walletwave_shared::cache::ProjectionCache;
use walletwave_shared::cache_aside::{CacheAside, DurableSource};
use walletwave_shared::events::{FinalStatus, NotificationRequested, OwnerRegistered};
use walletwave_shared::observability::metrics::record_notifications_persisted;

use crate::error::{NotificationError, Result};
use crate::models::{NewNotification, Notification, NotificationCategory};
use crate::profiles::Profile;
use crate::repository::NotificationRepository;
use crate::templates;

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    profiles: CacheAside<Profile>,
}

impl NotificationService {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        cache: Arc<dyn ProjectionCache>,
        profile_source: Arc<dyn DurableSource<Profile>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            profiles: CacheAside::new(cache, profile_source, cache_ttl),
        }
    }

    /// 欢迎通知，返回新写入的通知数
    #[instrument(skip(self), fields(owner_id = event.owner_id))]
    pub async fn on_owner_registered(&self, event: &OwnerRegistered) -> Result<usize> {
        let Some(profile) = self.profiles.get(event.owner_id).await? else {
            info!("用户资料不存在，跳过欢迎通知");
            return Ok(0);
        };

        let new = NewNotification::welcome(event.owner_id, templates::welcome(&profile.name));
        self.persist(vec![new], NotificationCategory::Welcome).await
    }

    /// 结算通知，返回新写入的通知数
    #[instrument(skip(self), fields(external_id = %event.external_id))]
    pub async fn on_settlement_notified(&self, event: &NotificationRequested) -> Result<usize> {
        let Some(sender) = self.profiles.get(event.sender).await? else {
            info!(sender = event.sender, "付款方资料不存在，跳过结算通知");
            return Ok(0);
        };
        let Some(receiver) = self.profiles.get(event.receiver).await? else {
            info!(receiver = event.receiver, "收款方资料不存在，跳过结算通知");
            return Ok(0);
        };

        let notifications = match event.status {
            FinalStatus::Success => vec![
                NewNotification::transaction(
                    sender.owner_id,
                    templates::debit_success(event.amount, &receiver.name),
                    &event.external_id,
                    "debit",
                ),
                NewNotification::transaction(
                    receiver.owner_id,
                    templates::credit_success(event.amount, &sender.name),
                    &event.external_id,
                    "credit",
                ),
            ],
            FinalStatus::Failed => vec![NewNotification::transaction(
                sender.owner_id,
                templates::debit_failure(event.amount, &receiver.name, event.reason.as_deref()),
                &event.external_id,
                "failure",
            )],
        };

        self.persist(notifications, NotificationCategory::Transaction)
            .await
    }

    /// 收件箱，最新的在前
    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Notification>> {
        Ok(self.repo.list_by_owner(owner_id).await?)
    }

    /// 标记单条通知为已读，只有接收人可以操作
    pub async fn mark_read(&self, notification_id: i64, requester_id: i64) -> Result<Notification> {
        let notification = self
            .repo
            .find_by_id(notification_id)
            .await?
            .ok_or(NotificationError::NotificationNotFound { notification_id })?;

        if notification.owner_id != requester_id {
            warn!(notification_id, requester_id, "非接收人尝试标记通知已读");
            return Err(NotificationError::Forbidden {
                notification_id,
                requester_id,
            });
        }

        self.repo.mark_read(notification_id).await?;
        self.repo
            .find_by_id(notification_id)
            .await?
            .ok_or(NotificationError::NotificationNotFound { notification_id })
    }

    /// 标记全部未读为已读，返回更新条数
    pub async fn mark_all_read(&self, owner_id: i64) -> Result<u64> {
        if self.repo.count_unread(owner_id).await? == 0 {
            return Ok(0);
        }
        let updated = self.repo.mark_all_read(owner_id).await?;
        info!(owner_id, updated, "通知已全部标记为已读");
        Ok(updated)
    }

    async fn persist(
        &self,
        notifications: Vec<NewNotification>,
        category: NotificationCategory,
    ) -> Result<usize> {
        let mut persisted = 0;
        for new in &notifications {
            match self.repo.insert_if_absent(new).await? {
                Some(n) => {
                    persisted += 1;
                    info!(notification_id = n.id, owner_id = n.owner_id, "通知已写入");
                }
                None => info!(dedup_key = %new.dedup_key, "通知已存在，跳过"),
            }
        }
        record_notifications_persisted(category.as_str(), persisted as u64);
        Ok(persisted)
    }
}
