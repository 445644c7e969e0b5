use std::env;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// 设置日志
///
/// local 环境输出到终端；其他环境按天滚动写入 log_files/（info 与 error 分离）。
pub async fn setup_logging() -> anyhow::Result<()> {
    let app_env = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());

    if app_env.eq_ignore_ascii_case("local") {
        let subscriber = Registry::default().with(
            fmt::layer()
                .with_ansi(true)
                .with_target(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stdout)
                .with_filter(EnvFilter::from_default_env().add_directive("info".parse()?)),
        );
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let info_file = RollingFileAppender::new(Rotation::DAILY, "log_files", "info.log");
        let error_file = RollingFileAppender::new(Rotation::DAILY, "log_files", "error.log");

        let (info_non_blocking, info_guard) = tracing_appender::non_blocking(info_file);
        let (error_non_blocking, error_guard) = tracing_appender::non_blocking(error_file);
        // guard 泄漏给进程生命周期，否则落盘线程随作用域结束
        std::mem::forget(info_guard);
        std::mem::forget(error_guard);

        let subscriber = Registry::default()
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(info_non_blocking)
                    .with_filter(EnvFilter::new("info")),
            )
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(error_non_blocking)
                    .with_filter(EnvFilter::new("error")),
            );

        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
