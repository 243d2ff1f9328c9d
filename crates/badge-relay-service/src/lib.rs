//! 徽章事件中继服务
//!
//! 宿主学习平台产生徽章授予、徽章创建、课程创建事件后，本服务拉取相关数据，
//! 扁平化为接收端需要的记录，并推送到外部 Webhook。
//!
//! ## 模块结构
//!
//! - `events`: 入站事件模型
//! - `fetcher`: 远端 RPC 徽章拉取
//! - `directory`: 宿主库只读查询（用户、课程、徽章定义）
//! - `transformer`: 徽章记录扁平化
//! - `publisher`: Webhook 编码与推送
//! - `dispatcher`: 按事件类型编排整条链路
//! - `badge_query`: 徽章定义过滤查询
//! - `handlers` / `routes` / `state`: HTTP 接口
//! - `cli`: 命令行

pub mod badge_query;
pub mod cli;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod handlers;
pub mod models;
pub mod publisher;
pub mod routes;
pub mod state;
pub mod transformer;

pub use dispatcher::{DispatchSettings, RelayDispatcher, RelayReport};
pub use error::{RelayError, Result};
pub use events::RelayEvent;
