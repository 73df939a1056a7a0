//! 事件契约与解码
//!
//! 定义转账流程中四个 topic 的负载结构，以及按 topic 做 schema 校验的解码步骤。
//! 解码结果是带类型标签的 `InboundEvent`，字段缺失或取值非法的事件在进入业务逻辑之前
//! 就被拒绝，不做"尽量提取字段"式的解析。
//!
//! 线上字段统一为 camelCase（ownerId、externalId、senderWalletId ...）。

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::kafka::topics;

// ---------------------------------------------------------------------------
// 负载结构
// ---------------------------------------------------------------------------

/// `owner.registered`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRegistered {
    pub owner_id: i64,
}

/// `transfer.initiated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInitiated {
    pub external_id: String,
    pub sender: i64,
    pub receiver: i64,
    pub amount: i64,
}

/// 结算结果
///
/// 序列化为 `success` / `failed`。解码时只有 `success`（不区分大小写）视为成功，
/// 其余任何取值（包括缺失和 null）都按失败处理，不会出现含糊的中间状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SettlementOutcome {
    Success,
    #[default]
    Failed,
}

impl SettlementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_token(token: &str) -> Self {
        if token.trim().eq_ignore_ascii_case("success") {
            Self::Success
        } else {
            Self::Failed
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SettlementOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SettlementOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = Option::<String>::deserialize(deserializer)?;
        Ok(token.map(|t| Self::from_token(&t)).unwrap_or_default())
    }
}

/// `transfer.settled`
///
/// sender / receiver 在线上是可选的：上游缺字段的结算事件仍然要送到编排服务，
/// 由它把对应交易置为 FAILED，而不是在解码阶段丢弃后让交易永远停在 PENDING。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSettled {
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<i64>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub outcome: SettlementOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_wallet_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_wallet_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransferSettled {
    pub fn success(
        initiated: &TransferInitiated,
        sender_wallet_id: i64,
        receiver_wallet_id: i64,
    ) -> Self {
        Self {
            external_id: initiated.external_id.clone(),
            sender: Some(initiated.sender),
            receiver: Some(initiated.receiver),
            amount: initiated.amount,
            outcome: SettlementOutcome::Success,
            sender_wallet_id: Some(sender_wallet_id),
            receiver_wallet_id: Some(receiver_wallet_id),
            reason: None,
        }
    }

    pub fn failed(initiated: &TransferInitiated, reason: impl Into<String>) -> Self {
        Self {
            external_id: initiated.external_id.clone(),
            sender: Some(initiated.sender),
            receiver: Some(initiated.receiver),
            amount: initiated.amount,
            outcome: SettlementOutcome::Failed,
            sender_wallet_id: None,
            receiver_wallet_id: None,
            reason: Some(reason.into()),
        }
    }

    /// 双方账户都存在时返回 (sender, receiver)
    pub fn parties(&self) -> Option<(i64, i64)> {
        self.sender.zip(self.receiver)
    }
}

/// 交易终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Success,
    Failed,
}

impl From<SettlementOutcome> for FinalStatus {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Success => Self::Success,
            SettlementOutcome::Failed => Self::Failed,
        }
    }
}

/// `notification.requested`
///
/// 结算负载加上交易终态。ownerId 为发起转账的一方。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequested {
    pub owner_id: i64,
    pub external_id: String,
    pub sender: i64,
    pub receiver: i64,
    pub amount: i64,
    pub outcome: SettlementOutcome,
    pub status: FinalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_wallet_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_wallet_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NotificationRequested {
    pub fn from_settlement(
        settled: &TransferSettled,
        sender: i64,
        receiver: i64,
        status: FinalStatus,
    ) -> Self {
        Self {
            owner_id: sender,
            external_id: settled.external_id.clone(),
            sender,
            receiver,
            amount: settled.amount,
            outcome: settled.outcome,
            status,
            sender_wallet_id: settled.sender_wallet_id,
            receiver_wallet_id: settled.receiver_wallet_id,
            reason: settled.reason.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// 解码
// ---------------------------------------------------------------------------

/// 事件解码错误
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("未知的 topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("事件格式错误 topic={topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("事件字段非法 topic={topic}: {reason}")]
    Invalid { topic: String, reason: String },
}

/// 按 topic 解码后的入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    OwnerRegistered(OwnerRegistered),
    TransferInitiated(TransferInitiated),
    TransferSettled(TransferSettled),
    NotificationRequested(NotificationRequested),
}

impl InboundEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::OwnerRegistered(_) => topics::OWNER_REGISTERED,
            Self::TransferInitiated(_) => topics::TRANSFER_INITIATED,
            Self::TransferSettled(_) => topics::TRANSFER_SETTLED,
            Self::NotificationRequested(_) => topics::NOTIFICATION_REQUESTED,
        }
    }

    /// 分区键：转账相关事件按 externalId，注册事件按 ownerId
    pub fn partition_key(&self) -> String {
        match self {
            Self::OwnerRegistered(e) => e.owner_id.to_string(),
            Self::TransferInitiated(e) => e.external_id.clone(),
            Self::TransferSettled(e) => e.external_id.clone(),
            Self::NotificationRequested(e) => e.external_id.clone(),
        }
    }
}

/// 按 topic 解码并校验事件负载
pub fn decode(topic: &str, payload: &[u8]) -> Result<InboundEvent, EventDecodeError> {
    let event = match topic {
        topics::OWNER_REGISTERED => InboundEvent::OwnerRegistered(parse(topic, payload)?),
        topics::TRANSFER_INITIATED => InboundEvent::TransferInitiated(parse(topic, payload)?),
        topics::TRANSFER_SETTLED => InboundEvent::TransferSettled(parse(topic, payload)?),
        topics::NOTIFICATION_REQUESTED => {
            InboundEvent::NotificationRequested(parse(topic, payload)?)
        }
        other => {
            return Err(EventDecodeError::UnknownTopic {
                topic: other.to_string(),
            });
        }
    };

    validate(&event).map_err(|reason| EventDecodeError::Invalid {
        topic: topic.to_string(),
        reason,
    })?;
    Ok(event)
}

fn parse<T: for<'de> Deserialize<'de>>(topic: &str, payload: &[u8]) -> Result<T, EventDecodeError> {
    serde_json::from_slice(payload).map_err(|source| EventDecodeError::Malformed {
        topic: topic.to_string(),
        source,
    })
}

fn validate(event: &InboundEvent) -> Result<(), String> {
    match event {
        InboundEvent::OwnerRegistered(e) => {
            if e.owner_id <= 0 {
                return Err(format!("ownerId 必须为正数: {}", e.owner_id));
            }
        }
        InboundEvent::TransferInitiated(e) => {
            require_external_id(&e.external_id)?;
            if e.amount <= 0 {
                return Err(format!("amount 必须为正数: {}", e.amount));
            }
        }
        InboundEvent::TransferSettled(e) => require_external_id(&e.external_id)?,
        InboundEvent::NotificationRequested(e) => {
            require_external_id(&e.external_id)?;
            if e.amount <= 0 {
                return Err(format!("amount 必须为正数: {}", e.amount));
            }
        }
    }
    Ok(())
}

fn require_external_id(external_id: &str) -> Result<(), String> {
    if external_id.trim().is_empty() {
        return Err("externalId 不能为空".to_string());
    }
    Ok(())
}
