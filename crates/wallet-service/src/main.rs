//! 钱包账本服务入口

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use walletwave_shared::{
    cache::Cache, config::AppConfig, database::Database, dlq::DlqProducer, kafka::KafkaProducer,
    observability,
};

use wallet_service::{
    consumer::LedgerConsumer, repository::PgWalletRepository, service::LedgerService,
};

const SERVICE_NAME: &str = "wallet-service";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load(SERVICE_NAME)?;

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(environment = %config.environment, "Starting wallet-service...");

    // 3. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    // 4. Redis 缓存，不可用时仅告警，读取会回源数据库
    let cache = Arc::new(Cache::new(&config.redis)?);
    if let Err(e) = cache.health_check().await {
        tracing::warn!(error = %e, "Redis 暂不可用，余额读取将直接访问数据库");
    }

    // 5. Kafka 生产者与死信队列
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let dlq = DlqProducer::new(producer.clone(), SERVICE_NAME);

    // 6. 账本服务与消费者
    let repo = Arc::new(PgWalletRepository::new(db.pool().clone()));
    let service = Arc::new(LedgerService::new(
        repo,
        cache,
        producer,
        &config.ledger,
        config.redis.cache_ttl(),
    )?);
    let consumer = LedgerConsumer::new(&config, service, dlq)?;

    // 7. 优雅关闭
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    consumer_handle.await??;
    db.close().await;

    info!("wallet-service stopped");
    Ok(())
}
