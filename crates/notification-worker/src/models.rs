//! 通知领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCategory {
    Welcome,
    Transaction,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::Transaction => "TRANSACTION",
        }
    }
}

/// 通知状态，只允许 UNREAD -> READ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    #[default]
    Unread,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub owner_id: i64,
    pub message: String,
    pub category: NotificationCategory,
    pub status: NotificationStatus,
    /// 去重键，同一事件重复投递时命中唯一约束
    #[serde(skip_serializing, default)]
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待落库的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub owner_id: i64,
    pub message: String,
    pub category: NotificationCategory,
    pub dedup_key: String,
}

impl NewNotification {
    pub fn welcome(owner_id: i64, message: String) -> Self {
        Self {
            owner_id,
            message,
            category: NotificationCategory::Welcome,
            dedup_key: format!("welcome:{owner_id}"),
        }
    }

    /// `leg` 取值 debit / credit / failure
    pub fn transaction(owner_id: i64, message: String, external_id: &str, leg: &str) -> Self {
        Self {
            owner_id,
            message,
            category: NotificationCategory::Transaction,
            dedup_key: format!("{external_id}:{leg}"),
        }
    }
}
