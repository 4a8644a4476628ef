use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::asset_types::InstrumentKind;

/// 日線數據點（原始數據表的一列）
///
/// 所有數值欄位皆可為空，上游可能回報整列為空的佔位資料。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DailyBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<i64>,
    pub amount: Option<f64>,
    // 指數與 ETF 專用
    pub amplitude: Option<f64>,
    pub change_rate: Option<f64>,
    pub change_amount: Option<f64>,
    pub turnover_rate: Option<f64>,
    // 股票專用
    pub outstanding_share: Option<f64>,
    pub turnover: Option<f64>,
}

impl DailyBar {
    /// 創建空的日線數據點
    pub fn empty(symbol: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            ..Default::default()
        }
    }

    /// 以 OHLCV 創建日線數據點
    pub fn ohlcv(
        symbol: impl Into<String>,
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            volume: Some(volume),
            ..Self::empty(symbol, date)
        }
    }

    /// 設定收盤價
    pub fn with_close(mut self, close: Option<f64>) -> Self {
        self.close = close;
        self
    }

    /// 所有數值欄位皆為空
    pub fn is_placeholder(&self) -> bool {
        self.volume.is_none() && self.float_fields().iter().all(|(_, v)| v.is_none())
    }

    /// 有收盤價的數據點
    pub fn is_priced(&self) -> bool {
        self.close.is_some()
    }

    /// 清除該類別資料表不存在的欄位
    pub fn normalized_for(mut self, kind: InstrumentKind) -> Self {
        match kind {
            InstrumentKind::Stock => {
                self.amplitude = None;
                self.change_rate = None;
                self.change_amount = None;
                self.turnover_rate = None;
            }
            InstrumentKind::Index | InstrumentKind::Etf => {
                self.outstanding_share = None;
                self.turnover = None;
            }
        }
        self
    }

    /// 浮點數欄位及其名稱
    pub fn float_fields(&self) -> [(&'static str, Option<f64>); 11] {
        [
            ("open", self.open),
            ("close", self.close),
            ("high", self.high),
            ("low", self.low),
            ("amount", self.amount),
            ("amplitude", self.amplitude),
            ("change_rate", self.change_rate),
            ("change_amount", self.change_amount),
            ("turnover_rate", self.turnover_rate),
            ("outstanding_share", self.outstanding_share),
            ("turnover", self.turnover),
        ]
    }

    /// 與另一數據點值不同的欄位名稱（不比較 symbol 與 date）
    pub fn differing_fields(&self, other: &DailyBar) -> Vec<&'static str> {
        let mut fields: Vec<&'static str> = self
            .float_fields()
            .iter()
            .zip(other.float_fields().iter())
            .filter(|((_, a), (_, b))| !same_float(*a, *b))
            .map(|((name, _), _)| *name)
            .collect();
        if self.volume != other.volume {
            fields.push("volume");
        }
        fields
    }

    pub fn same_values(&self, other: &DailyBar) -> bool {
        self.differing_fields(other).is_empty()
    }
}

fn same_float(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => false,
    }
}

/// 衍生數據點，`real_change` 為當日收盤價與前一個有價日收盤價之差
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub real_change: Option<f64>,
}

impl DerivedBar {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, real_change: Option<f64>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            real_change,
        }
    }
}
