//! 钱包领域模型
//!
//! 所有金额都是最小货币单位的整数。枚举同时支持数据库（sqlx）和 JSON（serde）序列化。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walletwave_shared::cache_aside::CacheProjection;
use walletwave_shared::error::WaveError;
use walletwave_shared::events::{SettlementOutcome, TransferInitiated, TransferSettled};

/// 币种
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
    Inr,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Inr => "INR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = WaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            "GBP" => Ok(Self::Gbp),
            "INR" => Ok(Self::Inr),
            other => Err(WaveError::Config(format!("不支持的币种: {other}"))),
        }
    }
}

/// 钱包
///
/// 每个用户恰好一个。余额只通过账本的相对调整变化，永远不小于 0。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: i64,
    pub owner_id: i64,
    pub balance: i64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheProjection for Wallet {
    const ENTITY: &'static str = "wallet";

    fn owner_id(&self) -> i64 {
        self.owner_id
    }
}

/// 对外暴露的余额视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub owner_id: i64,
    pub balance: i64,
    pub currency: Currency,
}

impl From<&Wallet> for Balance {
    fn from(wallet: &Wallet) -> Self {
        Self {
            owner_id: wallet.owner_id,
            balance: wallet.balance,
            currency: wallet.currency,
        }
    }
}

/// 账本流水
///
/// 每个 externalId 一行。成功入账和被拒绝的转账都会落一条，重复投递时按这里记下的结果
/// 重新发布，不再重新校验余额。
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerEntry {
    pub external_id: String,
    pub sender_wallet_id: Option<i64>,
    pub receiver_wallet_id: Option<i64>,
    pub amount: i64,
    pub outcome: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn applied(
        external_id: &str,
        sender_wallet_id: i64,
        receiver_wallet_id: i64,
        amount: i64,
    ) -> Self {
        Self {
            external_id: external_id.to_string(),
            sender_wallet_id: Some(sender_wallet_id),
            receiver_wallet_id: Some(receiver_wallet_id),
            amount,
            outcome: SettlementOutcome::Success.as_str().to_string(),
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn rejected(external_id: &str, amount: i64, reason: &str) -> Self {
        Self {
            external_id: external_id.to_string(),
            sender_wallet_id: None,
            receiver_wallet_id: None,
            amount,
            outcome: SettlementOutcome::Failed.as_str().to_string(),
            reason: Some(reason.to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn settlement_outcome(&self) -> SettlementOutcome {
        SettlementOutcome::from_token(&self.outcome)
    }

    /// 按记录的结果还原结算事件
    pub fn to_settlement(&self, initiated: &TransferInitiated) -> TransferSettled {
        match (
            self.settlement_outcome(),
            self.sender_wallet_id,
            self.receiver_wallet_id,
        ) {
            (SettlementOutcome::Success, Some(sender), Some(receiver)) => {
                TransferSettled::success(initiated, sender, receiver)
            }
            _ => TransferSettled::failed(initiated, self.reason.clone().unwrap_or_default()),
        }
    }
}

/// 一次转账入账的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferApplication {
    /// 扣款与入账已在同一事务内完成
    Applied,
    /// 该 externalId 之前已经结算过（成功或被拒绝），本次什么都没做
    Duplicate,
    /// 数据库层面的余额校验未通过，事务已回滚
    InsufficientBalance,
}
