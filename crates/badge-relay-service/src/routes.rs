//! 路由配置模块

use axum::{
    Router, middleware,
    routing::{get, post},
};
use badge_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 业务 API 路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(handlers::receive_event))
        .route("/badges", get(handlers::list_badges))
}

/// 构建完整应用
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
