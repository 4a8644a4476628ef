// monitor.rs - 日誌與監控指標

pub mod logger;
pub mod metrics;

pub use self::logger::init_logging;
pub use self::metrics::{install_prometheus, MetricType, SyncMetrics};

/// 監控系統錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("指標錯誤: {0}")]
    MetricsError(String),

    #[error("日誌錯誤: {0}")]
    LoggerError(String),

    #[error("初始化錯誤: {0}")]
    InitializationError(String),
}

/// 監控結果類型
pub type MonitorResult<T> = Result<T, MonitorError>;
