//! 应用状态定义

use std::sync::Arc;

use badge_shared::database::Database;

use crate::badge_query::BadgeCatalog;
use crate::dispatcher::RelayDispatcher;

/// Axum 应用共享状态
///
/// 全部成员只读，通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RelayDispatcher>,
    pub catalog: Arc<dyn BadgeCatalog>,
    /// 就绪探针检查用；测试中可以不配置数据库
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<RelayDispatcher>,
        catalog: Arc<dyn BadgeCatalog>,
        database: Option<Database>,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            database,
        }
    }
}
