use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain_types::{DailyBar, DerivedBar, InstrumentKind};

/// 日線數據列
///
/// 各類別的日線表欄位不同，查詢時不存在的欄位以 `NULL` 補齊。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyBarRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<i64>,
    pub amount: Option<f64>,
    pub amplitude: Option<f64>,
    pub change_rate: Option<f64>,
    pub change_amount: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub outstanding_share: Option<f64>,
    pub turnover: Option<f64>,
}

impl DailyBarRecord {
    /// 查詢用的欄位清單
    pub fn select_columns(kind: InstrumentKind) -> String {
        let mut columns = vec![
            "symbol".to_string(),
            "date".to_string(),
            "open".to_string(),
            "close".to_string(),
            "high".to_string(),
            "low".to_string(),
            "volume".to_string(),
            "amount".to_string(),
        ];
        for extra in [
            "amplitude",
            "change_rate",
            "change_amount",
            "turnover_rate",
            "outstanding_share",
            "turnover",
        ] {
            if kind.extra_columns().contains(&extra) {
                columns.push(extra.to_string());
            } else {
                columns.push(format!("NULL::DOUBLE PRECISION AS {}", extra));
            }
        }
        columns.join(", ")
    }
}

impl From<DailyBarRecord> for DailyBar {
    fn from(r: DailyBarRecord) -> Self {
        DailyBar {
            symbol: r.symbol,
            date: r.date,
            open: r.open,
            close: r.close,
            high: r.high,
            low: r.low,
            volume: r.volume,
            amount: r.amount,
            amplitude: r.amplitude,
            change_rate: r.change_rate,
            change_amount: r.change_amount,
            turnover_rate: r.turnover_rate,
            outstanding_share: r.outstanding_share,
            turnover: r.turnover,
        }
    }
}

/// 衍生數據列
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DerivedBarRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub real_change: Option<f64>,
}

impl From<DerivedBarRecord> for DerivedBar {
    fn from(r: DerivedBarRecord) -> Self {
        DerivedBar::new(r.symbol, r.date, r.real_change)
    }
}
