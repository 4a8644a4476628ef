// monitor/logger.rs - 日誌系統初始化

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;
use crate::monitor::{MonitorError, MonitorResult};

/// 由配置建立過濾器，`RUST_LOG` 優先
pub fn build_filter(log_config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_config.level.to_lowercase()))
}

/// 初始化全域日誌
///
/// 設定 `log.directory` 時另外輸出每日輪替的 JSON 日誌檔，
/// 返回的 guard 必須保留到程序結束，否則檔案緩衝不會刷新。
pub fn init_logging(log_config: &LogConfig) -> MonitorResult<Option<WorkerGuard>> {
    let json = log_config.format.eq_ignore_ascii_case("json");

    let stdout_layer = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().pretty().with_target(true).boxed()
    };

    let (file_layer, guard) = match &log_config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &log_config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(log_config))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| MonitorError::LoggerError(format!("設置日誌系統失敗: {}", e)))?;

    Ok(guard)
}
