//! 通知仓储
//!
//! 写入按 dedup_key 去重（`ON CONFLICT DO NOTHING`）；已读标记只更新 UNREAD 行。

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use walletwave_shared::error::Result;

use crate::models::{NewNotification, Notification, NotificationStatus};

/// 通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 写入通知，dedup_key 已存在时返回 `None`
    async fn insert_if_absent(&self, new: &NewNotification) -> Result<Option<Notification>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Notification>>;

    /// 最新的在前
    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Notification>>;

    async fn count_unread(&self, owner_id: i64) -> Result<i64>;

    /// UNREAD -> READ，已读的通知保持不变
    async fn mark_read(&self, id: i64) -> Result<()>;

    /// 返回被更新的行数
    async fn mark_all_read(&self, owner_id: i64) -> Result<u64>;
}

// ==================== PostgreSQL 实现 ====================

pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert_if_absent(&self, new: &NewNotification) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (owner_id, message, category, status, dedup_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING id, owner_id, message, category, status, dedup_key, created_at, updated_at
            "#,
        )
        .bind(new.owner_id)
        .bind(&new.message)
        .bind(new.category)
        .bind(NotificationStatus::Unread)
        .bind(&new.dedup_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, owner_id, message, category, status, dedup_key, created_at, updated_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, owner_id, message, category, status, dedup_key, created_at, updated_at
            FROM notifications
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn count_unread(&self, owner_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE owner_id = $1 AND status = 'UNREAD'
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn mark_read(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'READ', updated_at = NOW()
            WHERE id = $1 AND status = 'UNREAD'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_all_read(&self, owner_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'READ', updated_at = NOW()
            WHERE owner_id = $1 AND status = 'UNREAD'
            "#,
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// ==================== 内存实现 ====================

/// 内存通知仓储
///
/// `write_count` 统计实际修改过的行，测试用它断言"没有发生写入"。
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: DashMap<i64, Notification>,
    dedup_keys: DashMap<String, i64>,
    next_id: AtomicI64,
    writes: AtomicUsize,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert_if_absent(&self, new: &NewNotification) -> Result<Option<Notification>> {
        let slot = match self.dedup_keys.entry(new.dedup_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Ok(None),
            dashmap::mapref::entry::Entry::Vacant(slot) => slot,
        };

        let now = Utc::now();
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner_id: new.owner_id,
            message: new.message.clone(),
            category: new.category,
            status: NotificationStatus::Unread,
            dedup_key: new.dedup_key.clone(),
            created_at: now,
            updated_at: now,
        };
        slot.insert(notification.id);
        self.notifications.insert(notification.id, notification.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(notification))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Notification>> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Notification>> {
        let mut list: Vec<_> = self
            .notifications
            .iter()
            .filter(|n| n.owner_id == owner_id)
            .map(|n| n.value().clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn count_unread(&self, owner_id: i64) -> Result<i64> {
        let count = self
            .notifications
            .iter()
            .filter(|n| n.owner_id == owner_id && n.status == NotificationStatus::Unread)
            .count();
        Ok(count as i64)
    }

    async fn mark_read(&self, id: i64) -> Result<()> {
        if let Some(mut n) = self.notifications.get_mut(&id)
            && n.status == NotificationStatus::Unread
        {
            n.status = NotificationStatus::Read;
            n.updated_at = Utc::now();
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn mark_all_read(&self, owner_id: i64) -> Result<u64> {
        let mut updated = 0;
        for mut n in self.notifications.iter_mut() {
            if n.owner_id == owner_id && n.status == NotificationStatus::Unread {
                n.status = NotificationStatus::Read;
                n.updated_at = Utc::now();
                updated += 1;
            }
        }
        self.writes.fetch_add(updated as usize, Ordering::SeqCst);
        Ok(updated)
    }
}
