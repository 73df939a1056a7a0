//! 用户服务入口
//!
//! 注册入口（HTTP / gRPC）由上层网关负责，这里只初始化资料存储和事件发布，
//! 保持进程存活直到收到关闭信号。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};
use walletwave_shared::{
    cache::Cache, config::AppConfig, database::Database, kafka::KafkaProducer, observability,
};

use user_service::{repository::PgProfileRepository, service::UserService};

const SERVICE_NAME: &str = "user-service";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(environment = %config.environment, "Starting user-service...");

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    let cache = Arc::new(Cache::new(&config.redis)?);
    if let Err(e) = cache.health_check().await {
        warn!(error = %e, "Redis 暂不可用，资料读取将直接访问数据库");
    }

    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);
    let _service = Arc::new(UserService::new(
        Arc::new(PgProfileRepository::new(db.pool().clone())),
        cache,
        producer,
        config.redis.cache_ttl(),
    ));
    info!("user-service ready");

    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    db.close().await;
    info!("user-service stopped");
    Ok(())
}
