//! 中继事件模型
//!
//! 宿主平台触发的三类领域事件（徽章授予、徽章创建、课程创建）。
//! 事件以 JSON 形式投递到本服务，通过 `eventname` 字段区分类型；
//! 同时接受宿主平台原生的完整事件类名（如 `\core\event\badge_awarded`）。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BadgeAwarded,
    BadgeCreated,
    CourseCreated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadgeAwarded => "badge_awarded",
            Self::BadgeCreated => "badge_created",
            Self::CourseCreated => "course_created",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 徽章授予事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeAwardedEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    /// 获得徽章的用户
    pub relateduserid: i64,
    /// 被授予的徽章 id
    #[serde(default)]
    pub objectid: Option<i64>,
    #[serde(default)]
    pub courseid: Option<i64>,
}

/// 徽章创建事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeCreatedEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    /// 新徽章的 id
    pub objectid: i64,
    /// 徽章所在上下文，用于拼接图片地址
    pub contextid: i64,
}

/// 课程创建事件的附加信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseCreatedOther {
    pub fullname: String,
}

/// 课程创建事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseCreatedEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub courseid: i64,
    pub other: CourseCreatedOther,
}

/// 中继事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventname", rename_all = "snake_case")]
pub enum RelayEvent {
    #[serde(alias = "\\core\\event\\badge_awarded")]
    BadgeAwarded(BadgeAwardedEvent),
    #[serde(alias = "\\core\\event\\badge_created")]
    BadgeCreated(BadgeCreatedEvent),
    #[serde(alias = "\\core\\event\\course_created")]
    CourseCreated(CourseCreatedEvent),
}

impl RelayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BadgeAwarded(_) => EventKind::BadgeAwarded,
            Self::BadgeCreated(_) => EventKind::BadgeCreated,
            Self::CourseCreated(_) => EventKind::CourseCreated,
        }
    }

    /// 上游提供的事件 id
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::BadgeAwarded(e) => e.event_id.as_deref(),
            Self::BadgeCreated(e) => e.event_id.as_deref(),
            Self::CourseCreated(e) => e.event_id.as_deref(),
        }
    }

    /// 构造本次处理的上下文，上游未提供 event_id 时生成 UUID v7
    pub fn context(&self) -> EventContext {
        EventContext {
            event_id: self
                .event_id()
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            kind: self.kind(),
        }
    }
}

/// 单次事件处理的上下文，贯穿拉取、转换、推送三个阶段用于日志关联
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub event_id: String,
    pub kind: EventKind,
}

impl EventContext {
    pub fn new(event_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event_id: event_id.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_badge_awarded() {
        let json = r#"{"eventname": "badge_awarded", "relateduserid": 8, "objectid": 3}"#;
        let event: RelayEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::BadgeAwarded);
        match event {
            RelayEvent::BadgeAwarded(e) => {
                assert_eq!(e.relateduserid, 8);
                assert_eq!(e.objectid, Some(3));
                assert!(e.courseid.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_native_event_name() {
        let json = r#"{"eventname": "\\core\\event\\course_created", "courseid": 4, "other": {"fullname": "Algebra"}}"#;
        let event: RelayEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::CourseCreated);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let json = r#"{"eventname": "user_created", "objectid": 1}"#;
        assert!(serde_json::from_str::<RelayEvent>(json).is_err());
    }

    #[test]
    fn test_context_keeps_upstream_event_id() {
        let event = RelayEvent::BadgeCreated(BadgeCreatedEvent {
            event_id: Some("evt-42".to_string()),
            objectid: 6,
            contextid: 1,
        });
        let ctx = event.context();
        assert_eq!(ctx.event_id, "evt-42");
        assert_eq!(ctx.kind, EventKind::BadgeCreated);
    }

    #[test]
    fn test_context_generates_event_id() {
        let event = RelayEvent::CourseCreated(CourseCreatedEvent {
            event_id: None,
            courseid: 4,
            other: CourseCreatedOther {
                fullname: "Algebra".to_string(),
            },
        });
        let ctx = event.context();
        assert!(Uuid::parse_str(&ctx.event_id).is_ok());
        assert_eq!(ctx.kind.to_string(), "course_created");
    }
}
