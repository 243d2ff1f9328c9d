//! Webhook 推送
//!
//! 把中继记录序列化为 JSON，去掉最外层数组括号后做 URL 编码，再按配置的投递约定
//! POST 到接收端。只保留 HTTP 状态码，非 2xx 记为 `PublishFailed` 由调用方记录日志，
//! 不向事件源传播。默认只投递一次。

use async_trait::async_trait;
use badge_shared::config::{DeliveryMode, RelayConfig};
use badge_shared::observability::metrics;
use badge_shared::retry::{RetryPolicy, retry_with_policy};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

/// 一次推送的内容
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookPayload {
    pub event_id: String,
    /// 完整 JSON 文本（未去括号）
    pub json: String,
    /// 开启 attach_payload 时随表单体发送的原始文档
    pub attachment: Option<serde_json::Value>,
}

impl WebhookPayload {
    pub fn new<T: Serialize + ?Sized>(event_id: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self {
            event_id: event_id.into(),
            json: serde_json::to_string(body)?,
            attachment: None,
        })
    }

    pub fn with_attachment(mut self, attachment: Option<serde_json::Value>) -> Self {
        self.attachment = attachment;
        self
    }
}

/// 推送结果，只记录状态码
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub status: u16,
}

/// Webhook 推送接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookPublisher: Send + Sync {
    async fn publish(&self, payload: &WebhookPayload) -> Result<PublishOutcome>;
}

/// 去掉最外层的数组括号
///
/// 只在首尾恰好是一对 `[` `]` 时各去掉一个，对象原样返回；
/// 接收端补回括号即可还原列表。
pub fn strip_enclosing_brackets(json: &str) -> &str {
    json.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(json)
}

/// 按 application/x-www-form-urlencoded 规则编码（空格编码为 `+`）
///
/// 除字母数字和 `-_.` 外全部转义，`*` 也编码为 `%2A`，与宿主平台 `urlencode` 输出逐字节一致。
pub fn url_encode(text: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(text.as_bytes()).collect();
    encoded.replace('*', "%2A")
}

/// 去括号并编码，得到拼进 URL 的片段
pub fn encode_payload(json: &str) -> String {
    url_encode(strip_enclosing_brackets(json))
}

/// 根据投递约定构造目标 URL
pub fn build_target_url(
    target_post: &str,
    delivery: DeliveryMode,
    query_param: &str,
    json: &str,
) -> String {
    match delivery {
        DeliveryMode::UrlSuffix => format!("{}{}", target_post, encode_payload(json)),
        DeliveryMode::QueryParam => {
            let separator = if !target_post.contains('?') {
                "?"
            } else if target_post.ends_with('?') || target_post.ends_with('&') {
                ""
            } else {
                "&"
            };
            format!(
                "{}{}{}={}",
                target_post,
                separator,
                url_encode(query_param),
                encode_payload(json)
            )
        }
        DeliveryMode::JsonBody => target_post.to_string(),
    }
}

/// 基于 HTTP 的 Webhook 推送实现
pub struct HttpWebhookPublisher {
    client: Client,
    target_post: String,
    delivery: DeliveryMode,
    query_param: String,
    attach_payload: bool,
    retry_policy: RetryPolicy,
}

impl HttpWebhookPublisher {
    pub fn new(client: Client, config: &RelayConfig) -> Self {
        Self {
            client,
            target_post: config.target_post.clone(),
            delivery: config.delivery,
            query_param: config.query_param.clone(),
            attach_payload: config.attach_payload,
            retry_policy: RetryPolicy::with_max_retries(config.publish_max_retries),
        }
    }

    async fn send_once(&self, url: &str, payload: &WebhookPayload) -> Result<PublishOutcome> {
        let mut request = self.client.post(url);

        request = match self.delivery {
            DeliveryMode::JsonBody => request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.json.clone()),
            DeliveryMode::UrlSuffix | DeliveryMode::QueryParam => {
                match (&payload.attachment, self.attach_payload) {
                    (Some(document), true) => request.form(&[("json", document.to_string())]),
                    _ => request.header(reqwest::header::CONTENT_LENGTH, 0),
                }
            }
        };

        let response = request.send().await.map_err(|e| {
            metrics::record_publish(0, false);
            RelayError::PublishFailed {
                status: None,
                reason: if e.is_timeout() {
                    format!("请求超时: {e}")
                } else {
                    e.to_string()
                },
            }
        })?;

        let status = response.status();
        metrics::record_publish(status.as_u16(), status.is_success());

        if status.is_success() {
            Ok(PublishOutcome {
                status: status.as_u16(),
            })
        } else {
            Err(RelayError::PublishFailed {
                status: Some(status.as_u16()),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            })
        }
    }
}

#[async_trait]
impl WebhookPublisher for HttpWebhookPublisher {
    async fn publish(&self, payload: &WebhookPayload) -> Result<PublishOutcome> {
        let url = build_target_url(
            &self.target_post,
            self.delivery,
            &self.query_param,
            &payload.json,
        );

        if payload.attachment.is_some() && self.delivery == DeliveryMode::JsonBody {
            debug!(event_id = %payload.event_id, "json_body 投递方式不附带原始文档");
        }

        let result = retry_with_policy(
            &self.retry_policy,
            "webhook_publish",
            RelayError::is_retryable,
            || self.send_once(&url, payload),
        )
        .await;

        match &result {
            Ok(outcome) => info!(
                event_id = %payload.event_id,
                status = outcome.status,
                delivery = ?self.delivery,
                "Webhook 推送完成"
            ),
            Err(e) => warn!(
                event_id = %payload.event_id,
                delivery = ?self.delivery,
                error = %e,
                "Webhook 推送失败"
            ),
        }

        result
    }
}
