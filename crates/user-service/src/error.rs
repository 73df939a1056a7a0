//! 用户服务错误类型

use walletwave_shared::error::WaveError;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("用户资料不合法: {0}")]
    InvalidProfile(String),

    #[error("用户资料不存在: owner_id={owner_id}")]
    ProfileNotFound { owner_id: i64 },

    #[error(transparent)]
    Shared(#[from] WaveError),
}

impl UserError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_retryable(),
            Self::InvalidProfile(_) | Self::ProfileNotFound { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UserError>;
