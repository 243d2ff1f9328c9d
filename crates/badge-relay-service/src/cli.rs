//! CLI 命令定义
//!
//! 默认启动 HTTP 服务；`sync` 子命令不依赖入站事件，直接为一个用户同步徽章并退出。

use clap::{Parser, Subcommand};

/// 徽章中继服务命令行
#[derive(Parser, Debug)]
#[command(name = "badge-relay")]
#[command(version, about = "徽章事件中继服务")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别，覆盖配置文件 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// 未指定子命令时启动服务
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

/// 子命令枚举
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// 启动 HTTP 服务，接收宿主平台推送的事件
    Serve,

    /// 为指定用户执行一次徽章同步
    ///
    /// 拉取该用户的全部徽章，转换后推送到配置的 Webhook，打印状态码后退出。
    Sync {
        /// 宿主平台用户 ID
        #[arg(short, long)]
        user_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::parse_from(["badge-relay"]);
        assert_eq!(cli.command(), Commands::Serve);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_sync_command() {
        let cli = Cli::parse_from(["badge-relay", "sync", "--user-id", "8"]);
        assert_eq!(cli.command(), Commands::Sync { user_id: 8 });
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::parse_from(["badge-relay", "sync", "-u", "3", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.command(), Commands::Sync { user_id: 3 });
    }

    #[test]
    fn test_sync_requires_user_id() {
        assert!(Cli::try_parse_from(["badge-relay", "sync"]).is_err());
    }
}
