//! 宿主库只读查询
//!
//! 中继链路需要从宿主平台数据库解析用户名、课程全名和徽章定义。
//! 通过 `RelayDirectory` trait 抽象，流水线依赖接口而非具体实现，便于 mock 测试。

use async_trait::async_trait;
use badge_shared::config::DatabaseConfig;
use badge_shared::error::Result;
use sqlx::PgPool;

use crate::models::{BadgeDefinition, Course, RelayUser};

/// 宿主库查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayDirectory: Send + Sync {
    async fn find_user(&self, user_id: i64) -> Result<Option<RelayUser>>;
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>>;
    async fn find_badge(&self, badge_id: i64) -> Result<Option<BadgeDefinition>>;
}

/// 基于 PostgreSQL 的宿主库查询
///
/// 表名带宿主平台的前缀，前缀在配置加载时已校验过字符集，可以直接拼进 SQL。
pub struct PgDirectory {
    pool: PgPool,
    user_sql: String,
    course_sql: String,
    badge_sql: String,
}

impl PgDirectory {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            user_sql: format!(
                "SELECT id::bigint AS id, username FROM {} WHERE id = $1",
                config.table("user")
            ),
            course_sql: format!(
                "SELECT id::bigint AS id, fullname FROM {} WHERE id = $1",
                config.table("course")
            ),
            badge_sql: format!(
                r#"
                SELECT id::bigint AS id, name, courseid::bigint AS courseid,
                       expiredate::bigint AS expiredate
                FROM {}
                WHERE id = $1
                "#,
                config.table("badge")
            ),
        }
    }
}

#[async_trait]
impl RelayDirectory for PgDirectory {
    async fn find_user(&self, user_id: i64) -> Result<Option<RelayUser>> {
        let user = sqlx::query_as::<_, RelayUser>(&self.user_sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(&self.course_sql)
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(course)
    }

    async fn find_badge(&self, badge_id: i64) -> Result<Option<BadgeDefinition>> {
        let badge = sqlx::query_as::<_, BadgeDefinition>(&self.badge_sql)
            .bind(badge_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(badge)
    }
}
