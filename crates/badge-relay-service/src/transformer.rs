//! 徽章记录转换
//!
//! 把远端返回的徽章逐条扁平化为 `RelayRecord`：复制选定字段、附加用户信息、
//! 计算对外图片地址、解析课程全名。输出顺序与输入一致，条数相同。

use std::collections::HashMap;

use tracing::warn;

use crate::directory::RelayDirectory;
use crate::error::RelayError;
use crate::events::EventContext;
use crate::models::{BadgeRecord, RelayRecord, RelayUser};
use badge_shared::observability::metrics;

/// 远端图片地址中需要去掉的内部路径段
const WEBSERVICE_SEGMENT: &str = "/webservice";

/// 把 web service 图片地址转换为对外可访问的地址
///
/// 循环删除直到不再出现该路径段，保证多次应用结果不变。
pub fn public_image_url(url: &str) -> String {
    let mut result = url.replace(WEBSERVICE_SEGMENT, "");
    while result.contains(WEBSERVICE_SEGMENT) {
        result = result.replace(WEBSERVICE_SEGMENT, "");
    }
    result
}

/// 徽章转换器
pub struct BadgeTransformer<'a> {
    directory: &'a dyn RelayDirectory,
    course_placeholder: &'a str,
}

impl<'a> BadgeTransformer<'a> {
    pub fn new(directory: &'a dyn RelayDirectory, course_placeholder: &'a str) -> Self {
        Self {
            directory,
            course_placeholder,
        }
    }

    /// 转换一次事件拉取到的全部徽章
    ///
    /// 同一事件内相同课程只查询一次。课程缺失或查询出错都降级为占位值并继续处理，
    /// 返回值中的计数为降级条数。
    pub async fn transform(
        &self,
        ctx: &EventContext,
        user: &RelayUser,
        badges: &[BadgeRecord],
    ) -> (Vec<RelayRecord>, usize) {
        let mut course_names: HashMap<i64, Option<String>> = HashMap::new();
        let mut fallbacks = 0;
        let mut records = Vec::with_capacity(badges.len());

        for badge in badges {
            let course = match badge.courseid {
                None => None,
                Some(course_id) => {
                    let resolved = match course_names.get(&course_id) {
                        Some(cached) => cached.clone(),
                        None => {
                            let name = self.resolve_course(ctx, course_id).await;
                            course_names.insert(course_id, name.clone());
                            name
                        }
                    };
                    match resolved {
                        Some(name) => Some(name),
                        None => {
                            fallbacks += 1;
                            metrics::record_course_fallback();
                            Some(self.course_placeholder.to_string())
                        }
                    }
                }
            };

            records.push(RelayRecord {
                id: badge.id,
                courseid: badge.courseid,
                expiredate: badge.expiredate,
                name: badge.name.clone(),
                userid: user.id,
                username: user.username.clone(),
                image_url: public_image_url(&badge.badgeurl),
                course,
            });
        }

        (records, fallbacks)
    }

    async fn resolve_course(&self, ctx: &EventContext, course_id: i64) -> Option<String> {
        match self.directory.find_course(course_id).await {
            Ok(Some(course)) => Some(course.fullname),
            Ok(None) => {
                let err = RelayError::CourseLookupFailed { course_id };
                warn!(
                    event_id = %ctx.event_id,
                    course_id,
                    error = %err,
                    "课程不存在，使用占位值"
                );
                None
            }
            Err(e) => {
                warn!(
                    event_id = %ctx.event_id,
                    course_id,
                    error = %e,
                    "课程查询失败，使用占位值"
                );
                None
            }
        }
    }
}
