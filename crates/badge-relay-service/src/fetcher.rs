//! 远端徽章拉取
//!
//! 通过远端实例的 REST web service 调用 `core_badges_get_user_badges`，
//! 获取指定用户持有的全部徽章。任何失败都以 `FetchFailed` 返回并中止本次事件，
//! 不会把失败当作"零条徽章"继续往下走。

use std::time::Instant;

use async_trait::async_trait;
use badge_shared::config::RelayConfig;
use badge_shared::observability::metrics;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::models::{FetchedBadges, UserBadgesResponse};

/// 远端 web service 函数名
pub const GET_USER_BADGES_FUNCTION: &str = "core_badges_get_user_badges";

/// 徽章拉取接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BadgeFetcher: Send + Sync {
    async fn fetch_user_badges(&self, user_id: i64) -> Result<FetchedBadges>;
}

/// 基于 HTTP 的远端 RPC 拉取实现
pub struct RpcBadgeFetcher {
    client: Client,
    base_url: String,
    token: String,
}

impl RpcBadgeFetcher {
    pub fn new(client: Client, config: &RelayConfig) -> Self {
        Self {
            client,
            base_url: config.rpc_base_url(),
            token: config.token.clone(),
        }
    }

    /// REST 入口地址，userid 作为查询参数携带
    fn endpoint(&self, user_id: i64) -> String {
        format!(
            "{}/webservice/rest/server.php?moodlewsrestformat=json&userid={}",
            self.base_url, user_id
        )
    }

    async fn call(&self, user_id: i64) -> Result<FetchedBadges> {
        let failed = |reason: String| RelayError::FetchFailed { user_id, reason };

        let form = [
            ("wsfunction", GET_USER_BADGES_FUNCTION),
            ("wstoken", self.token.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint(user_id))
            .form(&form)
            .send()
            .await
            .map_err(|e| failed(describe_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status.as_u16())));
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| failed(format!("响应不是合法 JSON: {e}")))?;

        parse_document(user_id, document)
    }
}

#[async_trait]
impl BadgeFetcher for RpcBadgeFetcher {
    async fn fetch_user_badges(&self, user_id: i64) -> Result<FetchedBadges> {
        let start = Instant::now();
        debug!(user_id, url = %self.endpoint(user_id), "调用远端徽章接口");

        let result = self.call(user_id).await;
        let elapsed = start.elapsed();
        metrics::record_fetch_duration(result.is_ok(), elapsed.as_secs_f64());

        match &result {
            Ok(fetched) => info!(
                user_id,
                badge_count = fetched.badges.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "远端徽章拉取完成"
            ),
            Err(e) => warn!(user_id, error = %e, "远端徽章拉取失败"),
        }

        result
    }
}

/// 解析远端响应文档
///
/// 远端出错时仍返回 200，正文为 `{"exception": .., "errorcode": .., "message": ..}`，
/// 需要在解析徽章列表前先识别出来。
pub fn parse_document(user_id: i64, document: serde_json::Value) -> Result<FetchedBadges> {
    if let Some(exception) = document.get("exception") {
        let exception = exception.as_str().unwrap_or("exception");
        let errorcode = document
            .get("errorcode")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let message = document
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        return Err(RelayError::FetchFailed {
            user_id,
            reason: format!("远端异常 {exception} ({errorcode}): {message}"),
        });
    }

    let parsed: UserBadgesResponse =
        serde_json::from_value(document.clone()).map_err(|e| RelayError::FetchFailed {
            user_id,
            reason: format!("响应结构不符: {e}"),
        })?;

    if !parsed.warnings.is_empty() {
        warn!(user_id, warnings = ?parsed.warnings, "远端接口返回警告");
    }

    Ok(FetchedBadges {
        badges: parsed.badges,
        document,
    })
}

/// 区分超时与其他网络错误，便于日志排查
fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("请求超时: {err}")
    } else if err.is_connect() {
        format!("连接失败: {err}")
    } else {
        err.to_string()
    }
}
