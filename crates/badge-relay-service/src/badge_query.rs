//! 徽章定义查询
//!
//! 对宿主库 `badge` 表的只读过滤查询，供接收端核对徽章定义。
//! 过滤参数沿用宿主平台 `core_badges_get_badges` 的约定：
//! 数值为 0 或字符串为空表示不过滤，status >= 5 表示不按状态过滤，各条件 AND 组合。
//! name 与 version 按子串匹配，区分大小写。

use async_trait::async_trait;
use badge_shared::config::DatabaseConfig;
use badge_shared::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// 不按状态过滤的阈值
pub const STATUS_ANY: i64 = 5;

fn default_status() -> i64 {
    STATUS_ANY
}

/// 查询参数（原始形式）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BadgeQueryFilter {
    #[serde(default)]
    pub id: i64,
    /// 名称子串，区分大小写
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub expiredate: i64,
    #[serde(default)]
    pub expireperiod: i64,
    /// 1 = 站点徽章，2 = 课程徽章
    #[serde(default, rename = "type")]
    pub badge_type: i64,
    #[serde(default)]
    pub courseid: i64,
    #[serde(default = "default_status")]
    pub status: i64,
    /// 版本子串，区分大小写
    #[serde(default)]
    pub version: String,
}

/// 归一化后的查询条件，None 表示该列不参与过滤
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeCriteria {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub expiredate: Option<i64>,
    pub expireperiod: Option<i64>,
    pub badge_type: Option<i64>,
    pub courseid: Option<i64>,
    pub status: Option<i64>,
}

impl BadgeQueryFilter {
    pub fn criteria(&self) -> BadgeCriteria {
        let number = |v: i64| (v != 0).then_some(v);
        // 原样使用，不裁剪空白；宿主平台把 "0" 也当作空串
        let text = |v: &str| (!v.is_empty() && v != "0").then(|| v.to_string());

        BadgeCriteria {
            id: number(self.id),
            name: text(&self.name),
            version: text(&self.version),
            expiredate: number(self.expiredate),
            expireperiod: number(self.expireperiod),
            badge_type: number(self.badge_type),
            courseid: number(self.courseid),
            status: (self.status < STATUS_ANY).then_some(self.status),
        }
    }
}

/// 徽章定义，字段与宿主库 `badge` 表一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BadgeSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub timecreated: i64,
    pub timemodified: i64,
    pub usercreated: i64,
    pub usermodified: i64,
    pub issuername: String,
    pub issuerurl: String,
    pub issuercontact: Option<String>,
    pub expiredate: Option<i64>,
    pub expireperiod: Option<i64>,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub badge_type: i64,
    pub courseid: Option<i64>,
    pub message: String,
    pub messagesubject: String,
    /// 颁发通知邮件是否附带徽章文件
    pub attachment: i64,
    pub notification: i64,
    pub status: i64,
    pub nextcron: Option<i64>,
    pub version: Option<String>,
    pub language: Option<String>,
    pub imageauthorname: Option<String>,
    pub imageauthoremail: Option<String>,
    pub imageauthorurl: Option<String>,
    pub imagecaption: Option<String>,
}

/// 查询响应，结构与宿主平台接口一致
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgesResponse {
    pub badges: Vec<BadgeSummary>,
    pub warnings: Vec<serde_json::Value>,
}

impl BadgesResponse {
    pub fn new(badges: Vec<BadgeSummary>) -> Self {
        Self {
            badges,
            warnings: Vec::new(),
        }
    }
}

/// 徽章定义查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BadgeCatalog: Send + Sync {
    async fn list_badges(&self, criteria: &BadgeCriteria) -> Result<Vec<BadgeSummary>>;
}

/// 基于 PostgreSQL 的徽章定义查询
pub struct PgBadgeCatalog {
    pool: PgPool,
    list_sql: String,
}

impl PgBadgeCatalog {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            list_sql: list_badges_sql(&config.table("badge")),
        }
    }
}

/// 过滤查询语句；参数为 NULL 的条件不生效
fn list_badges_sql(table: &str) -> String {
    format!(
        r#"
        SELECT id::bigint AS id, name, description,
               timecreated::bigint AS timecreated, timemodified::bigint AS timemodified,
               usercreated::bigint AS usercreated, usermodified::bigint AS usermodified,
               issuername, issuerurl, issuercontact,
               expiredate::bigint AS expiredate, expireperiod::bigint AS expireperiod,
               type::bigint AS type, courseid::bigint AS courseid,
               message, messagesubject,
               attachment::bigint AS attachment, notification::bigint AS notification,
               status::bigint AS status, nextcron::bigint AS nextcron,
               version, language,
               imageauthorname, imageauthoremail, imageauthorurl, imagecaption
        FROM {table}
        WHERE ($1::bigint IS NULL OR id = $1)
          AND ($2::text IS NULL OR name LIKE '%' || $2 || '%')
          AND ($3::text IS NULL OR version LIKE '%' || $3 || '%')
          AND ($4::bigint IS NULL OR expiredate = $4)
          AND ($5::bigint IS NULL OR expireperiod = $5)
          AND ($6::bigint IS NULL OR type = $6)
          AND ($7::bigint IS NULL OR courseid = $7)
          AND ($8::bigint IS NULL OR status = $8)
        ORDER BY id
        "#
    )
}

#[async_trait]
impl BadgeCatalog for PgBadgeCatalog {
    async fn list_badges(&self, criteria: &BadgeCriteria) -> Result<Vec<BadgeSummary>> {
        let badges = sqlx::query_as::<_, BadgeSummary>(&self.list_sql)
            .bind(criteria.id)
            .bind(criteria.name.as_deref())
            .bind(criteria.version.as_deref())
            .bind(criteria.expiredate)
            .bind(criteria.expireperiod)
            .bind(criteria.badge_type)
            .bind(criteria.courseid)
            .bind(criteria.status)
            .fetch_all(&self.pool)
            .await?;

        Ok(badges)
    }
}
