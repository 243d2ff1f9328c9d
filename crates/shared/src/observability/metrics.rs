//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。未安装 recorder 时
//! 所有记录函数都是空操作，测试中可以放心调用。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册中继链路相关的指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("relay_events_total", "Total number of relay events handled");
    metrics::describe_counter!(
        "relay_publish_total",
        "Total number of webhook publish attempts by outcome"
    );
    metrics::describe_histogram!(
        "relay_fetch_duration_seconds",
        "Remote badge RPC fetch duration in seconds"
    );
    metrics::describe_counter!(
        "relay_course_fallback_total",
        "Number of relay records emitted with a course placeholder"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
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

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次中继事件的处理结果
#[inline]
pub fn record_relay_event(event_kind: &str, outcome: &str) {
    metrics::counter!(
        "relay_events_total",
        "event" => event_kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次 Webhook 推送；status 为 0 表示请求未拿到响应
#[inline]
pub fn record_publish(status: u16, success: bool) {
    metrics::counter!(
        "relay_publish_total",
        "status" => status.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

/// 记录远端 RPC 拉取耗时
#[inline]
pub fn record_fetch_duration(success: bool, duration_secs: f64) {
    metrics::histogram!(
        "relay_fetch_duration_seconds",
        "success" => success.to_string()
    )
    .record(duration_secs);
}

/// 记录课程名回退为占位值
#[inline]
pub fn record_course_fallback() {
    metrics::counter!("relay_course_fallback_total").increment(1);
}
