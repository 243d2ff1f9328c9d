//! 中继服务错误类型
//!
//! 在共享库 BadgeError 基础上定义中继链路特有的错误变体，
//! 使上层可以精确区分"拉取失败/课程缺失/推送失败"等不同失败原因。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use badge_shared::error::BadgeError;
use serde_json::json;

/// 中继链路错误
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 远端 RPC 调用失败：网络错误、非 2xx、响应无法解析或返回异常文档
    #[error("拉取用户徽章失败: user_id={user_id}, 原因={reason}")]
    FetchFailed { user_id: i64, reason: String },

    /// 徽章引用的课程在宿主库中不存在；转换阶段会降级为占位值，不中断链路
    #[error("课程未找到: course_id={course_id}")]
    CourseLookupFailed { course_id: i64 },

    /// Webhook 推送失败，status 为 None 表示未拿到 HTTP 响应
    #[error("Webhook 推送失败: status={status:?}, 原因={reason}")]
    PublishFailed { status: Option<u16>, reason: String },

    #[error("用户不存在: user_id={user_id}")]
    UserNotFound { user_id: i64 },

    #[error("徽章不存在: badge_id={badge_id}")]
    BadgeNotFound { badge_id: i64 },

    #[error("JSON 处理错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP 客户端初始化失败: {0}")]
    HttpClient(String),

    /// 透传共享库错误，避免在每个分支手动转换
    #[error(transparent)]
    Shared(#[from] BadgeError),
}

impl RelayError {
    /// 错误码（用于 API 响应与日志聚合）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "FETCH_FAILED",
            Self::CourseLookupFailed { .. } => "COURSE_LOOKUP_FAILED",
            Self::PublishFailed { .. } => "PUBLISH_FAILED",
            Self::UserNotFound { .. } => "USER_NOT_FOUND",
            Self::BadgeNotFound { .. } => "BADGE_NOT_FOUND",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::FetchFailed { .. } | Self::PublishFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::CourseLookupFailed { .. } | Self::UserNotFound { .. } | Self::BadgeNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::Shared(BadgeError::Validation(_) | BadgeError::InvalidArgument { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Serialization(_) | Self::HttpClient(_) | Self::Shared(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 推送是否值得重试：网络层失败或接收端 5xx
    ///
    /// 只有配置了 publish_max_retries 时才会被使用。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PublishFailed { status: None, .. } => true,
            Self::PublishFailed {
                status: Some(code), ..
            } => *code >= 500,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Shared(BadgeError::Database(e)) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::HttpClient(e) => {
                tracing::error!(error = %e, "HTTP 客户端错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;
