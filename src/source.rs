//! 上游數據源
//!
//! `BarSource` 是同步流程與上游之間的接縫，`HttpBarSource` 透過 AKTools
//! HTTP API 取得 akshare 的日線、商品清單、熱度排名與交易日曆。

use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

use crate::domain_types::{DailyBar, DateWindow, HotRank, Instrument, InstrumentKind};

pub mod http;
pub mod record;
pub mod validator;

pub use http::HttpBarSource;
pub use validator::BarValidator;

/// 上游錯誤
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// 網路、協定、5xx 或逾時，可以重試
    #[error("數據源不可用: {0}")]
    Unavailable(String),

    /// 上游限流
    #[error("數據源限流，建議等待 {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// 數據不符合格式，重試無意義
    #[error("無效數據: {0}")]
    DataInvalid(String),
}

impl SourceError {
    /// 指標與日誌使用的簡短分類
    pub fn label(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "unavailable",
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::DataInvalid(_) => "data_invalid",
        }
    }
}

/// 一次請求取得的日線（依日期遞增），以及因驗證失敗被丟棄的記錄數
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub bars: Vec<DailyBar>,
    pub rejected: usize,
}

impl SourceBatch {
    pub fn new(mut bars: Vec<DailyBar>, rejected: usize) -> Self {
        bars.sort_by_key(|b| b.date);
        Self { bars, rejected }
    }
}

/// 日線數據源接口
#[async_trait]
pub trait BarSource: Send + Sync {
    /// 取得一個商品在區間內的日線
    async fn fetch_bars(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> Result<SourceBatch, SourceError>;

    /// 取得某類別的商品清單
    async fn list_instruments(&self, kind: InstrumentKind) -> Result<Vec<Instrument>, SourceError>;

    /// 取得個股的熱度排名歷史
    async fn fetch_hot_rank(&self, symbol: &str) -> Result<Vec<HotRank>, SourceError>;

    /// 取得上游的歷史交易日（遞增）
    async fn trade_calendar(&self) -> Result<Vec<NaiveDate>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_batch_is_sorted_by_date() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let batch = SourceBatch::new(
            vec![DailyBar::empty("x", d(3)), DailyBar::empty("x", d(1))],
            2,
        );
        assert_eq!(batch.bars[0].date, d(1));
        assert_eq!(batch.rejected, 2);
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(SourceError::Unavailable("x".into()).label(), "unavailable");
        assert_eq!(SourceError::RateLimited { retry_after: None }.label(), "rate_limited");
    }
}
