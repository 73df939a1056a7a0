//! 通知服务错误类型

use thiserror::Error;
use walletwave_shared::error::WaveError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知不存在: {notification_id}")]
    NotificationNotFound { notification_id: i64 },

    /// 只有通知的接收人可以标记已读
    #[error("无权操作通知 {notification_id}: requester={requester_id}")]
    Forbidden {
        notification_id: i64,
        requester_id: i64,
    },

    #[error(transparent)]
    Shared(#[from] WaveError),
}

impl NotificationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NotificationError>;
