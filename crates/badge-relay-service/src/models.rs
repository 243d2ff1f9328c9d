//! 中继链路数据模型
//!
//! 远端 RPC 返回的徽章记录、宿主库中的只读实体，以及推送给 Webhook 的各类记录。
//! 所有模型只存在于单次事件处理期间，不做任何持久化。

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 远端 RPC 模型
// ---------------------------------------------------------------------------

/// 远端 `core_badges_get_user_badges` 返回的单个徽章
///
/// 只声明中继需要的字段，其余字段（description、issuer 等）在反序列化时忽略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeRecord {
    pub id: i64,
    /// 站点徽章没有所属课程
    #[serde(default)]
    pub courseid: Option<i64>,
    #[serde(default)]
    pub expiredate: Option<i64>,
    pub name: String,
    /// 远端通过 web service 提供的图片地址
    #[serde(default)]
    pub badgeurl: String,
}

/// 远端用户徽章列表响应
#[derive(Debug, Clone, Deserialize)]
pub struct UserBadgesResponse {
    pub badges: Vec<BadgeRecord>,
    #[serde(default)]
    pub warnings: Vec<serde_json::Value>,
}

/// 一次拉取的结果：解析后的徽章列表 + 原始响应文档
///
/// 原始文档在开启 attach_payload 时会随推送一起发给接收端。
#[derive(Debug, Clone)]
pub struct FetchedBadges {
    pub badges: Vec<BadgeRecord>,
    pub document: serde_json::Value,
}

// ---------------------------------------------------------------------------
// 宿主库只读实体
// ---------------------------------------------------------------------------

/// 触发事件的用户
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RelayUser {
    pub id: i64,
    pub username: String,
}

/// 课程（仅用于解析课程全名）
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub fullname: String,
}

/// 徽章定义（badge_created 事件使用）
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BadgeDefinition {
    pub id: i64,
    pub name: String,
    pub courseid: Option<i64>,
    pub expiredate: Option<i64>,
}

// ---------------------------------------------------------------------------
// 推送记录
// ---------------------------------------------------------------------------

/// 扁平化后推送给 Webhook 的徽章记录
///
/// 字段声明顺序即 JSON 输出顺序，接收端按此顺序解析。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub id: i64,
    pub courseid: Option<i64>,
    pub expiredate: Option<i64>,
    pub name: String,
    pub userid: i64,
    pub username: String,
    pub image_url: String,
    /// courseid 为空时为 null；课程查不到时为配置的占位值
    pub course: Option<String>,
}

/// 课程创建事件的推送记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseCreatedRecord {
    pub event: String,
    pub coursename: String,
    pub course_id: i64,
}

impl CourseCreatedRecord {
    pub fn new(course_id: i64, coursename: impl Into<String>) -> Self {
        Self {
            event: "course_created".to_string(),
            coursename: coursename.into(),
            course_id,
        }
    }
}

/// 徽章创建事件的推送记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeCreatedRecord {
    pub event: String,
    pub id: i64,
    pub name: String,
    pub courseid: Option<i64>,
    pub expiredate: Option<i64>,
    pub badgeurl: String,
}

impl BadgeCreatedRecord {
    pub fn new(badge: &BadgeDefinition, badgeurl: impl Into<String>) -> Self {
        Self {
            event: "badge_created".to_string(),
            id: badge.id,
            name: badge.name.clone(),
            courseid: badge.courseid,
            expiredate: badge.expiredate,
            badgeurl: badgeurl.into(),
        }
    }
}
