//! Kafka 消费者与事件分发
//!
//! 订阅 `owner.registered` 与 `transfer.initiated`，按 topic 解码后交给 LedgerService。
//! - 解码失败：写入死信队列，不重试
//! - 基础设施瞬时故障：按重试策略退避重试，耗尽后写入死信队列

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use walletwave_shared::config::AppConfig;
use walletwave_shared::dlq::DlqProducer;
use walletwave_shared::events::{self, InboundEvent};
use walletwave_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use walletwave_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{LedgerError, Result};
use crate::service::LedgerService;

const SUBSCRIBED_TOPICS: [&str; 2] = [topics::OWNER_REGISTERED, topics::TRANSFER_INITIATED];

/// 账本事件消费者
pub struct LedgerConsumer {
    consumer: KafkaConsumer,
    service: Arc<LedgerService>,
    dlq: DlqProducer,
    retry_policy: RetryPolicy,
}

impl LedgerConsumer {
    pub fn new(config: &AppConfig, service: Arc<LedgerService>, dlq: DlqProducer) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("ledger"))?;
        Ok(Self {
            consumer,
            service,
            dlq,
            retry_policy: config.retry.policy(),
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&SUBSCRIBED_TOPICS)?;
        info!(topics = ?SUBSCRIBED_TOPICS, "账本事件消费者已启动");

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
                            "处理账本事件失败"
                        );
                    }
                    Ok(())
                }
            })
            .await;

        info!("账本事件消费者已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息
///
/// 解码失败的消息写入死信队列后返回 Ok，避免同一条坏消息反复被记录为处理失败。
pub async fn handle_message(
    service: &LedgerService,
    dlq: &DlqProducer,
    policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<()> {
    let event = match events::decode(&msg.topic, &msg.payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(topic = %msg.topic, offset = msg.offset, error = %e, "事件解码失败，发送到死信队列");
            dlq.send_or_log(msg, &e.to_string(), 0).await;
            return Ok(());
        }
    };

    let result = retry_with_policy(policy, "ledger.dispatch", LedgerError::is_retryable, || {
        dispatch(service, &event)
    })
    .await;

    if let Err(e) = result {
        let retries = if e.is_retryable() { policy.max_retries } else { 0 };
        dlq.send_or_log(msg, &e.to_string(), retries).await;
        return Err(e);
    }
    Ok(())
}

async fn dispatch(service: &LedgerService, event: &InboundEvent) -> Result<()> {
    match event {
        InboundEvent::OwnerRegistered(e) => service.on_owner_registered(e).await,
        InboundEvent::TransferInitiated(e) => service.on_transfer_initiated(e).await.map(|_| ()),
        other => {
            warn!(topic = other.topic(), "账本服务未订阅该 topic，忽略");
            Ok(())
        }
    }
}
