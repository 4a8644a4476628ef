use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::domain_types::{DateWindow, HotRank, Instrument, InstrumentKind};
use crate::source::record::{
    bare_code, daily_stock_symbol, hot_rank_symbol, parse_daily_bar, parse_hot_rank, parse_instrument,
    parse_trade_date,
};
use crate::source::{BarSource, BarValidator, SourceBatch, SourceError};
use crate::utils::to_compact_date;

/// AKTools HTTP API 數據源
pub struct HttpBarSource {
    client: Client,
    base_url: String,
    adjust: String,
    index_category: String,
    validator: BarValidator,
}

impl HttpBarSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SourceError::Unavailable(format!("無法建立 HTTP 客戶端: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            adjust: config.adjust.clone(),
            index_category: config.index_category.clone(),
            validator: BarValidator::new(),
        })
    }

    fn endpoint(&self, function: &str) -> String {
        format!("{}/api/public/{}", self.base_url, function)
    }

    /// 呼叫一個 akshare 函數並取得記錄陣列
    async fn call(&self, function: &str, params: &[(&str, String)]) -> Result<Vec<Value>, SourceError> {
        let url = self.endpoint(function);
        debug!(function, ?params, "請求上游數據");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("{} 請求失敗: {}", function, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SourceError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(SourceError::Unavailable(format!("{} 回應 HTTP {}", function, status)));
        }
        if !status.is_success() {
            return Err(SourceError::DataInvalid(format!("{} 回應 HTTP {}", function, status)));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Unavailable(format!("{} 讀取回應逾時: {}", function, e))
            } else {
                SourceError::DataInvalid(format!("{} 回應不是有效的 JSON: {}", function, e))
            }
        })?;

        match body {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(SourceError::DataInvalid(format!(
                "{} 回應不是陣列: {}",
                function,
                truncate(&other.to_string(), 200)
            ))),
        }
    }

    /// 各類別對應的日線函數與參數
    fn daily_request(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> (&'static str, Vec<(&'static str, String)>) {
        let start = to_compact_date(window.start());
        let end = to_compact_date(window.end());
        match kind {
            InstrumentKind::Stock => (
                "stock_zh_a_daily",
                vec![
                    ("symbol", daily_stock_symbol(symbol)),
                    ("start_date", start),
                    ("end_date", end),
                    ("adjust", self.adjust.clone()),
                ],
            ),
            InstrumentKind::Index => (
                "index_zh_a_hist",
                vec![
                    ("symbol", bare_code(symbol).to_string()),
                    ("period", "daily".to_string()),
                    ("start_date", start),
                    ("end_date", end),
                ],
            ),
            InstrumentKind::Etf => (
                "fund_etf_hist_em",
                vec![
                    ("symbol", symbol.to_string()),
                    ("period", "daily".to_string()),
                    ("start_date", start),
                    ("end_date", end),
                    ("adjust", self.adjust.clone()),
                ],
            ),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[async_trait]
impl BarSource for HttpBarSource {
    async fn fetch_bars(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> Result<SourceBatch, SourceError> {
        let (function, params) = self.daily_request(kind, symbol, window);
        let records = self.call(function, &params).await?;

        let mut bars = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for value in &records {
            let parsed = parse_daily_bar(kind, symbol, value)
                .and_then(|bar| self.validator.validate(&bar).map(|_| bar));
            match parsed {
                // 上游偶爾回傳區間外的數據
                Ok(bar) if window.contains(bar.date) => bars.push(bar),
                Ok(_) => {}
                Err(err) => {
                    rejected += 1;
                    warn!(kind = %kind, symbol, error = %err, "丟棄無效的日線記錄");
                }
            }
        }

        Ok(SourceBatch::new(bars, rejected))
    }

    async fn list_instruments(&self, kind: InstrumentKind) -> Result<Vec<Instrument>, SourceError> {
        let (function, params): (&str, Vec<(&str, String)>) = match kind {
            InstrumentKind::Stock => ("stock_info_a_code_name", Vec::new()),
            InstrumentKind::Index => (
                "stock_zh_index_spot_em",
                vec![("symbol", self.index_category.clone())],
            ),
            InstrumentKind::Etf => ("fund_etf_spot_em", Vec::new()),
        };
        let records = self.call(function, &params).await?;

        let mut instruments = Vec::with_capacity(records.len());
        for value in &records {
            match parse_instrument(kind, value) {
                Ok(inst) => instruments.push(inst),
                Err(err) => warn!(kind = %kind, error = %err, "丟棄無效的商品記錄"),
            }
        }
        Ok(instruments)
    }

    async fn fetch_hot_rank(&self, symbol: &str) -> Result<Vec<HotRank>, SourceError> {
        let params = vec![("symbol", hot_rank_symbol(symbol))];
        let records = self.call("stock_hot_rank_detail_em", &params).await?;

        let mut ranks = Vec::with_capacity(records.len());
        for value in &records {
            match parse_hot_rank(symbol, value) {
                Ok(rank) => ranks.push(rank),
                Err(err) => warn!(symbol, error = %err, "丟棄無效的熱度排名記錄"),
            }
        }
        Ok(ranks)
    }

    async fn trade_calendar(&self) -> Result<Vec<NaiveDate>, SourceError> {
        let records = self.call("tool_trade_date_hist_sina", &[]).await?;
        let mut days = records
            .iter()
            .map(parse_trade_date)
            .collect::<Result<Vec<_>, _>>()?;
        days.sort();
        Ok(days)
    }
}
