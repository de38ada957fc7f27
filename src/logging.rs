//! 日志系统配置
//!
//! 控制台输出 + 可选的按天滚动文件持久化

use crate::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 初始化日志系统
///
/// # 参数
/// * `config` - 日志配置（级别、文件目录、是否持久化）
///
/// # 返回
/// 文件日志的 WorkerGuard，调用方必须保持其存活，否则缓冲日志会丢失
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    // 环境变量 RUST_LOG 优先于配置文件中的级别
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let console_layer = fmt::layer()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(true);

    if config.enabled {
        let file_appender =
            tracing_appender::rolling::daily(&config.log_dir, "resumable-upload.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .with_ansi(false)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
