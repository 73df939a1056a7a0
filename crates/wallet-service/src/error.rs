//! 账本服务专用错误类型

use walletwave_shared::error::WaveError;

/// 账本服务错误
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// 查询余额时该用户没有钱包
    #[error("钱包不存在: owner_id={owner_id}")]
    WalletNotFound { owner_id: i64 },

    #[error(transparent)]
    Shared(#[from] WaveError),
}

impl LedgerError {
    /// 只有基础设施瞬时故障值得重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_retryable(),
            Self::WalletNotFound { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
