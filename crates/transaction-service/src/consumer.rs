//! Kafka 消费者与事件分发
//!
//! 订阅 `transfer.settled`，解码后交给 TransactionService::on_settled。
//! - 未知交易：记录告警后丢弃
//! - 缺少交易双方：交易已置为 FAILED，原始消息写入死信队列
//! - 基础设施瞬时故障：退避重试，耗尽后写入死信队列

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use walletwave_shared::config::AppConfig;
use walletwave_shared::dlq::DlqProducer;
use walletwave_shared::events::{self, InboundEvent};
use walletwave_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use walletwave_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{OrchestratorError, Result};
use crate::service::TransactionService;

/// 结算事件消费者
pub struct SettlementConsumer {
    consumer: KafkaConsumer,
    service: Arc<TransactionService>,
    dlq: DlqProducer,
    retry_policy: RetryPolicy,
}

impl SettlementConsumer {
    pub fn new(
        config: &AppConfig,
        service: Arc<TransactionService>,
        dlq: DlqProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("orchestrator"))?;
        Ok(Self {
            consumer,
            service,
            dlq,
            retry_policy: config.retry.policy(),
        })
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&[topics::TRANSFER_SETTLED])?;
        info!(topic = topics::TRANSFER_SETTLED, "结算事件消费者已启动");

        let service = self.service;
        let dlq = self.dlq;
        let policy = self.retry_policy;

        self.consumer
            .start(shutdown, |msg| {
                let service = &service;
                let dlq = &dlq;
                let policy = &policy;
                async move {
                    if let Err(e) = handle_message(service, dlq, policy, &msg).await {
                        error!(
                            error = %e,
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            "处理结算事件失败"
                        );
                    }
                    Ok(())
                }
            })
            .await;

        info!("结算事件消费者已停止");
        Ok(())
    }
}

/// 处理单条结算消息
pub async fn handle_message(
    service: &TransactionService,
    dlq: &DlqProducer,
    policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<()> {
    let settled = match events::decode(&msg.topic, &msg.payload) {
        Ok(InboundEvent::TransferSettled(settled)) => settled,
        Ok(other) => {
            warn!(topic = other.topic(), "编排服务未订阅该 topic，忽略");
            return Ok(());
        }
        Err(e) => {
            warn!(topic = %msg.topic, offset = msg.offset, error = %e, "事件解码失败，发送到死信队列");
            dlq.send_or_log(msg, &e.to_string(), 0).await;
            return Ok(());
        }
    };

    let result = retry_with_policy(
        policy,
        "orchestrator.on_settled",
        OrchestratorError::is_retryable,
        || service.on_settled(&settled),
    )
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(OrchestratorError::UnknownTransaction { external_id }) => {
            warn!(external_id = %external_id, "结算事件引用的交易不存在，丢弃");
            Ok(())
        }
        Err(e @ OrchestratorError::MalformedEvent { .. }) => {
            dlq.send_or_log(msg, &e.to_string(), 0).await;
            Err(e)
        }
        Err(e) => {
            let retries = if e.is_retryable() { policy.max_retries } else { 0 };
            dlq.send_or_log(msg, &e.to_string(), retries).await;
            Err(e)
        }
    }
}
