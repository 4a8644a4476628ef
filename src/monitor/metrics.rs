use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::monitor::{MonitorError, MonitorResult};

/// 監控指標命名空間
pub const METRIC_NAMESPACE: &str = "stock_sync";

/// 監控指標類型
#[derive(Debug, Clone, Copy)]
pub enum MetricType {
    /// 對上游的一次請求嘗試
    Request { outcome: &'static str },
    /// 重試決策
    Retry { reason: &'static str },
    /// 單一商品的同步結果
    SymbolOutcome { outcome: &'static str },
    /// 寫入的數據列
    RowsUpserted { count: usize },
    /// 因驗證失敗被丟棄的記錄
    RowsRejected { count: usize },
}

/// 同步監控指標記錄器
pub struct SyncMetrics;

impl SyncMetrics {
    /// 記錄同步指標
    ///
    /// # Arguments
    /// * `kind` - 商品類別 (如 "stock", "index")
    /// * `metric_type` - 指標類型
    pub fn record(kind: &'static str, metric_type: MetricType) {
        match metric_type {
            MetricType::Request { outcome } => {
                counter!(
                    format!("{}.requests", METRIC_NAMESPACE),
                    "outcome" => outcome,
                    "kind" => kind
                )
                .increment(1);
            }
            MetricType::Retry { reason } => {
                counter!(
                    format!("{}.retries", METRIC_NAMESPACE),
                    "reason" => reason,
                    "kind" => kind
                )
                .increment(1);
            }
            MetricType::SymbolOutcome { outcome } => {
                counter!(
                    format!("{}.symbols", METRIC_NAMESPACE),
                    "outcome" => outcome,
                    "kind" => kind
                )
                .increment(1);
            }
            MetricType::RowsUpserted { count } => {
                counter!(
                    format!("{}.rows_upserted", METRIC_NAMESPACE),
                    "kind" => kind
                )
                .increment(count as u64);
            }
            MetricType::RowsRejected { count } => {
                counter!(
                    format!("{}.rows_rejected", METRIC_NAMESPACE),
                    "kind" => kind
                )
                .increment(count as u64);
            }
        }
    }

    /// 記錄退避等待時間
    pub fn record_backoff(delay: Duration) {
        histogram!(format!("{}.backoff_seconds", METRIC_NAMESPACE)).record(delay);
    }

    /// 記錄單一商品的處理耗時
    pub fn record_symbol_duration(kind: &'static str, duration: Duration) {
        histogram!(
            format!("{}.symbol_duration_seconds", METRIC_NAMESPACE),
            "kind" => kind
        )
        .record(duration);
    }

    /// 記錄一次同步執行的耗時
    pub fn record_run_duration(mode: &'static str, duration: Duration) {
        histogram!(
            format!("{}.run_duration_seconds", METRIC_NAMESPACE),
            "mode" => mode
        )
        .record(duration);
    }
}

/// 啟動 Prometheus HTTP 指標輸出
///
/// 必須在 tokio runtime 內呼叫。
pub fn install_prometheus(listen: &str) -> MonitorResult<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| MonitorError::InitializationError(format!("無效的監聽位址 {}: {}", listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MonitorError::MetricsError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder() {
        // 沒有安裝 recorder 時記錄為空操作
        SyncMetrics::record("stock", MetricType::Request { outcome: "ok" });
        SyncMetrics::record("etf", MetricType::RowsUpserted { count: 3 });
        SyncMetrics::record_backoff(Duration::from_millis(10));
    }

    #[test]
    fn test_install_rejects_bad_address() {
        assert!(matches!(
            install_prometheus("nowhere"),
            Err(MonitorError::InitializationError(_))
        ));
    }
}
