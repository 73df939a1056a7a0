//! Kafka 消费者与事件分发
//!
//! 订阅 `owner.registered`（欢迎通知）和 `notification.requested`（结算通知）。
//! 解码失败和重试耗尽的消息写入死信队列。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use walletwave_shared::config::AppConfig;
use walletwave_shared::dlq::DlqProducer;
use walletwave_shared::events::{self, InboundEvent};
use walletwave_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use walletwave_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{NotificationError, Result};
use crate::service::NotificationService;

const SUBSCRIBED_TOPICS: [&str; 2] = [topics::OWNER_REGISTERED, topics::NOTIFICATION_REQUESTED];

pub struct NotificationConsumer {
    consumer: KafkaConsumer,
    service: Arc<NotificationService>,
    dlq: DlqProducer,
    retry_policy: RetryPolicy,
}

impl NotificationConsumer {
    pub fn new(
        config: &AppConfig,
        service: Arc<NotificationService>,
        dlq: DlqProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("notifications"))?;
        Ok(Self {
            consumer,
            service,
            dlq,
            retry_policy: config.retry.policy(),
        })
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&SUBSCRIBED_TOPICS)?;
        info!(topics = ?SUBSCRIBED_TOPICS, "通知消费者已启动");

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
                            "处理通知事件失败"
                        );
                    }
                    Ok(())
                }
            })
            .await;

        info!("通知消费者已停止");
        Ok(())
    }
}

/// 处理单条消息，返回新写入的通知数
pub async fn handle_message(
    service: &NotificationService,
    dlq: &DlqProducer,
    policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<usize> {
    let event = match events::decode(&msg.topic, &msg.payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(topic = %msg.topic, offset = msg.offset, error = %e, "事件解码失败，发送到死信队列");
            dlq.send_or_log(msg, &e.to_string(), 0).await;
            return Ok(0);
        }
    };

    let result = retry_with_policy(
        policy,
        "notifications.dispatch",
        NotificationError::is_retryable,
        || dispatch(service, &event),
    )
    .await;

    match result {
        Ok(count) => Ok(count),
        Err(e) => {
            let retries = if e.is_retryable() { policy.max_retries } else { 0 };
            dlq.send_or_log(msg, &e.to_string(), retries).await;
            Err(e)
        }
    }
}

async fn dispatch(service: &NotificationService, event: &InboundEvent) -> Result<usize> {
    match event {
        InboundEvent::OwnerRegistered(e) => service.on_owner_registered(e).await,
        InboundEvent::NotificationRequested(e) => service.on_settlement_notified(e).await,
        other => {
            warn!(topic = other.topic(), "通知服务未订阅该 topic，忽略");
            Ok(0)
        }
    }
}
