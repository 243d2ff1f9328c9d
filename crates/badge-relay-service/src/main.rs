//! 徽章中继服务入口
//!
//! `serve`（默认）启动 HTTP 服务接收宿主平台事件；`sync --user-id` 为单个用户执行一次同步。

use std::sync::Arc;

use anyhow::Context;
use badge_relay_service::{
    DispatchSettings, RelayDispatcher, RelayError,
    badge_query::PgBadgeCatalog,
    cli::{Cli, Commands},
    directory::PgDirectory,
    fetcher::RpcBadgeFetcher,
    publisher::HttpWebhookPublisher,
    routes,
    state::AppState,
};
use badge_shared::{config::AppConfig, database::Database, observability};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

const SERVICE_NAME: &str = "badge-relay-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. 加载配置：default.toml → {env}.toml → {service}.toml → BADGE_ 环境变量
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;

    // 2. 初始化可观测性，命令行日志级别优先
    let obs_config = config
        .observability
        .clone()
        .with_service_name(SERVICE_NAME)
        .with_log_level(cli.log_level.as_deref());
    let _guard = observability::init(&obs_config).await?;

    config.validate().context("配置校验失败")?;
    info!(
        environment = %config.environment,
        target_moodle = %config.relay.target_moodle,
        delivery = ?config.relay.delivery,
        "Configuration loaded"
    );
    if config.is_production() && config.relay.rpc_scheme == "http" {
        warn!("生产环境使用 http 调用远端接口，token 将以明文传输");
    }

    // 3. 基础设施：宿主库延迟连接，外呼客户端统一超时
    let db = Database::connect_lazy(&config.database)?;
    let client = reqwest::Client::builder()
        .timeout(config.relay.request_timeout())
        .build()
        .map_err(|e| RelayError::HttpClient(e.to_string()))?;

    let directory = Arc::new(PgDirectory::new(db.pool().clone(), &config.database));
    let dispatcher = Arc::new(RelayDispatcher::new(
        Arc::new(RpcBadgeFetcher::new(client.clone(), &config.relay)),
        Arc::new(HttpWebhookPublisher::new(client, &config.relay)),
        directory,
        DispatchSettings::from_config(&config.relay),
    ));

    match cli.command() {
        Commands::Serve => {
            let catalog = Arc::new(PgBadgeCatalog::new(db.pool().clone(), &config.database));
            let state = AppState::new(dispatcher, catalog, Some(db.clone()));
            let app = routes::build_router(state);

            let listener = TcpListener::bind(config.server_addr()).await?;
            info!("Listening on {}", config.server_addr());

            // 优雅关闭：停止接收新连接并等待进行中的事件处理完毕
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            info!("Server shutdown complete");
        }
        Commands::Sync { user_id } => {
            info!(user_id, target_post = %config.relay.target_post, "开始同步用户徽章");

            let report = dispatcher.sync_user(user_id).await?;
            info!(
                user_id,
                event_id = %report.event_id,
                records = report.records,
                status = ?report.status,
                published = report.published,
                "同步完成"
            );
        }
    }

    db.close().await;
    Ok(())
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
