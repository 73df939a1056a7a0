//! 死信队列
//!
//! 无法解码的事件、上游负载缺字段的结算事件、以及重试耗尽仍失败的事件，
//! 都会连同失败原因写入 `walletwave.dlq`，供人工排查或离线重放。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::Result;
use crate::kafka::{ConsumerMessage, EventPublisher, publish_json, topics};
use crate::observability::metrics::record_dead_letter;

/// 死信消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息标识（消息 key 或 topic-partition-offset）
    pub message_id: String,
    pub source_topic: String,
    /// 原始消息内容
    pub payload: String,
    /// 失败原因
    pub error: String,
    pub source_service: String,
    /// 进入死信队列前已在消费端重试的次数
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterMessage {
    pub fn from_message(
        msg: &ConsumerMessage,
        error: impl Into<String>,
        source_service: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            message_id: msg.message_id(),
            source_topic: msg.topic.clone(),
            payload: msg.payload_lossy(),
            error: error.into(),
            source_service: source_service.into(),
            retry_count,
            failed_at: Utc::now(),
        }
    }
}

/// DLQ 生产者
#[derive(Clone)]
pub struct DlqProducer {
    publisher: Arc<dyn EventPublisher>,
    source_service: String,
}

impl DlqProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>, source_service: &str) -> Self {
        Self {
            publisher,
            source_service: source_service.to_string(),
        }
    }

    /// 将失败消息写入死信队列
    pub async fn send(&self, msg: &ConsumerMessage, error: &str, retry_count: u32) -> Result<()> {
        let dead_letter =
            DeadLetterMessage::from_message(msg, error, &self.source_service, retry_count);

        publish_json(
            self.publisher.as_ref(),
            topics::DEAD_LETTER_QUEUE,
            &dead_letter.message_id,
            &dead_letter,
        )
        .await?;

        record_dead_letter(&msg.topic);
        warn!(
            message_id = %dead_letter.message_id,
            source_topic = %msg.topic,
            error,
            "消息已发送到死信队列"
        );
        Ok(())
    }

    /// 写入死信队列，失败时只记录日志
    pub async fn send_or_log(&self, msg: &ConsumerMessage, error: &str, retry_count: u32) {
        if let Err(e) = self.send(msg, error, retry_count).await {
            error!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "发送到死信队列失败，消息可能丢失"
            );
        }
    }
}
