//! 交易领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walletwave_shared::events::FinalStatus;

/// 交易状态
///
/// 只允许 PENDING -> SUCCESS 或 PENDING -> FAILED，终态不可再变。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl From<FinalStatus> for TransactionStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Success => Self::Success,
            FinalStatus::Failed => Self::Failed,
        }
    }
}

/// 转账交易
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    /// 对外暴露的交易号，也是所有事件的幂等键
    pub external_id: String,
    pub sender: i64,
    pub receiver: i64,
    pub amount: i64,
    pub comment: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 客户端提交的转账请求
///
/// sender / receiver 可能缺失，由 `TransactionService::submit` 校验。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub sender: Option<i64>,
    pub receiver: Option<i64>,
    pub amount: i64,
    pub comment: Option<String>,
}

/// 待落库的交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub external_id: String,
    pub sender: i64,
    pub receiver: i64,
    pub amount: i64,
    pub comment: Option<String>,
}

/// 处理结算事件的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    /// 本次事件把交易推进到了终态
    Finalized(Transaction),
    /// 交易此前已是终态，本次事件被忽略
    AlreadySettled(Transaction),
}

impl SettlementResult {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Finalized(tx) | Self::AlreadySettled(tx) => tx,
        }
    }
}
