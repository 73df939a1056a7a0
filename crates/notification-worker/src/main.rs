//! 通知工作者服务入口

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use walletwave_shared::{
    cache::Cache, config::AppConfig, database::Database, dlq::DlqProducer, kafka::KafkaProducer,
    observability,
};

use notification_worker::{
    consumer::NotificationConsumer, profiles::PgProfileSource,
    repository::PgNotificationRepository, service::NotificationService,
};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(environment = %config.environment, "Starting notification-worker...");

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    let cache = Arc::new(Cache::new(&config.redis)?);
    if let Err(e) = cache.health_check().await {
        warn!(error = %e, "Redis 暂不可用，显示名将直接从数据库读取");
    }

    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let dlq = DlqProducer::new(producer, SERVICE_NAME);

    let service = Arc::new(NotificationService::new(
        Arc::new(PgNotificationRepository::new(db.pool().clone())),
        cache,
        Arc::new(PgProfileSource::new(db.pool().clone())),
        config.redis.cache_ttl(),
    ));
    let consumer = NotificationConsumer::new(&config, service, dlq)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    consumer_handle.await??;
    db.close().await;

    info!("notification-worker stopped");
    Ok(())
}
