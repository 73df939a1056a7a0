//! 转账交易编排服务入口
//!
//! 除结算事件消费者外，还周期性运行 PENDING 交易对账任务。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use walletwave_shared::{
    config::AppConfig, database::Database, dlq::DlqProducer, kafka::KafkaProducer, observability,
};

use transaction_service::{
    consumer::SettlementConsumer, repository::PgTransactionRepository,
    service::TransactionService,
};

const SERVICE_NAME: &str = "transaction-service";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load(SERVICE_NAME)?;

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(environment = %config.environment, "Starting transaction-service...");

    // 3. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    // 4. Kafka 生产者与死信队列
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let dlq = DlqProducer::new(producer.clone(), SERVICE_NAME);

    // 5. 编排服务与消费者
    let repo = Arc::new(PgTransactionRepository::new(db.pool().clone()));
    let service = Arc::new(TransactionService::new(repo, producer, &config.saga));
    let consumer = SettlementConsumer::new(&config, service.clone(), dlq)?;

    // 6. 优雅关闭
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx.clone()));
    let reconcile_handle = tokio::spawn(run_reconciliation(
        service,
        Duration::from_secs(config.saga.reconcile_interval_seconds),
        Duration::from_secs(config.saga.reconcile_after_seconds),
        shutdown_rx,
    ));

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    consumer_handle.await??;
    reconcile_handle.await?;
    db.close().await;

    info!("transaction-service stopped");
    Ok(())
}

/// 周期性重新发布停留在 PENDING 的交易
async fn run_reconciliation(
    service: Arc<TransactionService>,
    interval: Duration,
    older_than: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("对账任务退出");
                    break;
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = service.reconcile_pending(older_than).await {
                    warn!(error = %e, "PENDING 交易对账失败");
                }
            }
        }
    }
}
