//! HTTP 处理器
//!
//! 入站事件、徽章定义查询以及存活/就绪探针。

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use badge_shared::error::BadgeError;
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    badge_query::{BadgeQueryFilter, BadgesResponse},
    dispatcher::RelayReport,
    error::{RelayError, Result},
    events::RelayEvent,
    state::AppState,
};

/// 接收中继事件
///
/// POST /api/events
///
/// 事件在本次请求内处理完毕。推送失败体现在报告里，仍返回 202；
/// 拉取失败或实体缺失返回对应的错误响应。
#[instrument(skip(state, payload))]
pub async fn receive_event(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RelayEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<RelayReport>)> {
    let Json(event) =
        payload.map_err(|e| BadgeError::Validation(format!("无法解析事件: {}", e.body_text())))?;

    info!(event = %event.kind(), event_id = ?event.event_id(), "收到中继事件");

    let report = state.dispatcher.dispatch(event).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// 按条件查询徽章定义
///
/// GET /api/badges
#[instrument(skip(state))]
pub async fn list_badges(
    State(state): State<AppState>,
    Query(filter): Query<BadgeQueryFilter>,
) -> Result<Json<BadgesResponse>> {
    let criteria = filter.criteria();
    let badges = state
        .catalog
        .list_badges(&criteria)
        .await
        .map_err(RelayError::from)?;

    Ok(Json(BadgesResponse::new(badges)))
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "badge-relay-service"
    }))
}

/// 就绪探针：检查宿主数据库连接
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = match &state.database {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": "badge-relay-service",
            "checks": {
                "database": if db_ok { "ok" } else { "fail" }
            }
        })),
    )
}
