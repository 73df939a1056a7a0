//! 编排服务专用错误类型
//!
//! 在共享库 WaveError 基础上增加交易编排特有的三类错误。

use walletwave_shared::error::WaveError;

/// 交易编排错误
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// 转账请求缺字段或取值非法，交易不会落库
    #[error("无效的转账请求: {0}")]
    InvalidRequest(String),

    /// 结算事件引用的交易不存在，记录日志后丢弃，不重试
    #[error("交易不存在: {external_id}")]
    UnknownTransaction { external_id: String },

    /// 结算事件缺少付款方或收款方，对应交易已被置为 FAILED
    #[error("结算事件格式错误: {external_id}: {reason}")]
    MalformedEvent { external_id: String, reason: String },

    #[error(transparent)]
    Shared(#[from] WaveError),
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
