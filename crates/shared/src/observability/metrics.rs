//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时（单元测试）记录函数是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 安装 recorder 并在指定端口启动 `/metrics` 与 `/health`
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!(
        "transfers_submitted_total",
        "Number of transfers accepted as PENDING"
    );
    metrics::describe_counter!(
        "settlements_total",
        "Number of transactions finalized, by outcome"
    );
    metrics::describe_counter!(
        "ledger_rejections_total",
        "Number of transfers rejected by the ledger, by reason"
    );
    metrics::describe_counter!(
        "cache_lookups_total",
        "Cache-aside lookups by entity and result (hit, miss, error)"
    );
    metrics::describe_counter!(
        "notifications_persisted_total",
        "Number of notifications written, by category"
    );
    metrics::describe_counter!(
        "events_dead_lettered_total",
        "Number of inbound events sent to the dead-letter queue, by source topic"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 记录函数
// ============================================================================

#[inline]
pub fn record_transfer_submitted() {
    metrics::counter!("transfers_submitted_total").increment(1);
}

#[inline]
pub fn record_settlement(outcome: &str) {
    metrics::counter!("settlements_total", "outcome" => outcome.to_string()).increment(1);
}

#[inline]
pub fn record_ledger_rejection(reason: &str) {
    metrics::counter!("ledger_rejections_total", "reason" => reason.to_string()).increment(1);
}

/// result 取值：hit / miss / error
#[inline]
pub fn record_cache_lookup(entity: &str, result: &str) {
    metrics::counter!(
        "cache_lookups_total",
        "entity" => entity.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_notifications_persisted(category: &str, count: u64) {
    metrics::counter!(
        "notifications_persisted_total",
        "category" => category.to_string()
    )
    .increment(count);
}

#[inline]
pub fn record_dead_letter(topic: &str) {
    metrics::counter!("events_dead_lettered_total", "topic" => topic.to_string()).increment(1);
}
