//! 事件分发
//!
//! 每个入站事件独立跑完一条链路，事件之间不共享可变状态，每个事件最多推送一次：
//!
//! - badge_awarded：查用户 → 拉取远端徽章 → 转换 → 推送列表
//! - badge_created：查徽章定义 → 拼接图片地址 → 推送单条记录
//! - course_created：直接由事件内容构造记录 → 推送
//!
//! 推送失败只记录在 `RelayReport` 中，不向事件源传播；
//! 拉取失败与实体缺失则中止本次事件并返回错误。

use std::sync::Arc;

use badge_shared::config::RelayConfig;
use badge_shared::observability::metrics;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::directory::RelayDirectory;
use crate::error::{RelayError, Result};
use crate::events::{
    BadgeAwardedEvent, BadgeCreatedEvent, CourseCreatedEvent, EventContext, EventKind, RelayEvent,
};
use crate::fetcher::BadgeFetcher;
use crate::models::{BadgeCreatedRecord, CourseCreatedRecord};
use crate::publisher::{WebhookPayload, WebhookPublisher};
use crate::transformer::{BadgeTransformer, public_image_url};

/// 分发器需要的配置子集
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// 课程查不到时写入 `course` 字段的占位值
    pub course_placeholder: String,
    /// 拼接 badge_created 图片地址用的站点根地址
    pub public_base_url: String,
}

impl DispatchSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            course_placeholder: config.course_placeholder.clone(),
            public_base_url: config.public_base_url(),
        }
    }

    /// 新建徽章的图片地址
    fn badge_image_url(&self, context_id: i64, badge_id: i64) -> String {
        let url = format!(
            "{}/webservice/pluginfile.php/{}/badges/badgeimage/{}/f1",
            self.public_base_url.trim_end_matches('/'),
            context_id,
            badge_id
        );
        public_image_url(&url)
    }
}

/// 单次事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub event_id: String,
    pub event: EventKind,
    /// 推送的记录条数
    pub records: usize,
    pub published: bool,
    /// 接收端返回的 HTTP 状态码，网络层失败时为空
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 使用课程占位值的记录条数
    pub course_fallbacks: usize,
}

impl RelayReport {
    fn new(ctx: &EventContext, records: usize) -> Self {
        Self {
            event_id: ctx.event_id.clone(),
            event: ctx.kind,
            records,
            published: false,
            status: None,
            error: None,
            course_fallbacks: 0,
        }
    }
}

/// 事件分发器
pub struct RelayDispatcher {
    fetcher: Arc<dyn BadgeFetcher>,
    publisher: Arc<dyn WebhookPublisher>,
    directory: Arc<dyn RelayDirectory>,
    settings: DispatchSettings,
}

impl RelayDispatcher {
    pub fn new(
        fetcher: Arc<dyn BadgeFetcher>,
        publisher: Arc<dyn WebhookPublisher>,
        directory: Arc<dyn RelayDirectory>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            fetcher,
            publisher,
            directory,
            settings,
        }
    }

    /// 处理一个中继事件
    pub async fn dispatch(&self, event: RelayEvent) -> Result<RelayReport> {
        let ctx = event.context();

        let result = match &event {
            RelayEvent::BadgeAwarded(e) => self.handle_badge_awarded(&ctx, e).await,
            RelayEvent::BadgeCreated(e) => self.handle_badge_created(&ctx, e).await,
            RelayEvent::CourseCreated(e) => self.handle_course_created(&ctx, e).await,
        };

        match &result {
            Ok(report) => {
                let outcome = if report.published { "published" } else { "publish_failed" };
                metrics::record_relay_event(ctx.kind.as_str(), outcome);
            }
            Err(e) => {
                metrics::record_relay_event(ctx.kind.as_str(), "aborted");
                error!(
                    event_id = %ctx.event_id,
                    event = %ctx.kind,
                    code = e.error_code(),
                    error = %e,
                    "事件处理中止"
                );
            }
        }

        result
    }

    /// 不依赖入站事件，直接为指定用户跑一次 badge_awarded 链路
    pub async fn sync_user(&self, user_id: i64) -> Result<RelayReport> {
        self.dispatch(RelayEvent::BadgeAwarded(BadgeAwardedEvent {
            event_id: None,
            relateduserid: user_id,
            objectid: None,
            courseid: None,
        }))
        .await
    }

    #[instrument(skip(self, ctx, event), fields(event_id = %ctx.event_id, user_id = event.relateduserid))]
    async fn handle_badge_awarded(
        &self,
        ctx: &EventContext,
        event: &BadgeAwardedEvent,
    ) -> Result<RelayReport> {
        let user_id = event.relateduserid;

        let user = self
            .directory
            .find_user(user_id)
            .await?
            .ok_or(RelayError::UserNotFound { user_id })?;

        let fetched = self.fetcher.fetch_user_badges(user_id).await?;

        let transformer = BadgeTransformer::new(
            self.directory.as_ref(),
            &self.settings.course_placeholder,
        );
        let (records, course_fallbacks) = transformer.transform(ctx, &user, &fetched.badges).await;

        info!(
            badge_id = ?event.objectid,
            records = records.len(),
            course_fallbacks,
            "徽章记录转换完成"
        );

        let payload = WebhookPayload::new(&ctx.event_id, &records)?
            .with_attachment(Some(fetched.document));

        let mut report = RelayReport::new(ctx, records.len());
        report.course_fallbacks = course_fallbacks;
        Ok(self.publish(ctx, &payload, report).await)
    }

    #[instrument(skip(self, ctx, event), fields(event_id = %ctx.event_id, badge_id = event.objectid))]
    async fn handle_badge_created(
        &self,
        ctx: &EventContext,
        event: &BadgeCreatedEvent,
    ) -> Result<RelayReport> {
        let badge_id = event.objectid;

        let badge = self
            .directory
            .find_badge(badge_id)
            .await?
            .ok_or(RelayError::BadgeNotFound { badge_id })?;

        let record = BadgeCreatedRecord::new(
            &badge,
            self.settings.badge_image_url(event.contextid, badge_id),
        );
        let payload = WebhookPayload::new(&ctx.event_id, &record)?;

        Ok(self.publish(ctx, &payload, RelayReport::new(ctx, 1)).await)
    }

    #[instrument(skip(self, ctx, event), fields(event_id = %ctx.event_id, course_id = event.courseid))]
    async fn handle_course_created(
        &self,
        ctx: &EventContext,
        event: &CourseCreatedEvent,
    ) -> Result<RelayReport> {
        let record = CourseCreatedRecord::new(event.courseid, event.other.fullname.clone());
        let payload = WebhookPayload::new(&ctx.event_id, &record)?;

        Ok(self.publish(ctx, &payload, RelayReport::new(ctx, 1)).await)
    }

    /// 推送并把结果写进报告；失败只记录日志
    async fn publish(
        &self,
        ctx: &EventContext,
        payload: &WebhookPayload,
        mut report: RelayReport,
    ) -> RelayReport {
        match self.publisher.publish(payload).await {
            Ok(outcome) => {
                report.published = true;
                report.status = Some(outcome.status);
            }
            Err(e) => {
                let status = match &e {
                    RelayError::PublishFailed { status, .. } => *status,
                    _ => None,
                };
                warn!(
                    event_id = %ctx.event_id,
                    status = ?status,
                    error = %e,
                    "推送失败，不向事件源传播"
                );
                report.status = status;
                report.error = Some(e.to_string());
            }
        }
        report
    }
}
