use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::DomainError;

/// 金融商品類別，每個類別對應一組獨立的資料表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Stock, // 股票
    Index, // 指數
    Etf,   // ETF
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 3] = [
        InstrumentKind::Stock,
        InstrumentKind::Index,
        InstrumentKind::Etf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Stock => "stock",
            InstrumentKind::Index => "index",
            InstrumentKind::Etf => "etf",
        }
    }

    /// 日線原始數據表
    pub fn daily_table(&self) -> &'static str {
        match self {
            InstrumentKind::Stock => "daily_stock",
            InstrumentKind::Index => "daily_index",
            InstrumentKind::Etf => "daily_etf",
        }
    }

    /// 衍生數據表
    pub fn derived_table(&self) -> &'static str {
        match self {
            InstrumentKind::Stock => "derived_stock",
            InstrumentKind::Index => "derived_index",
            InstrumentKind::Etf => "derived_etf",
        }
    }

    /// 商品資訊表
    pub fn info_table(&self) -> &'static str {
        match self {
            InstrumentKind::Stock => "stock_info",
            InstrumentKind::Index => "index_info",
            InstrumentKind::Etf => "etf_info",
        }
    }

    /// 該類別日線表上除 OHLCV 以外實際存在的欄位
    pub fn extra_columns(&self) -> &'static [&'static str] {
        match self {
            InstrumentKind::Stock => &["outstanding_share", "turnover"],
            InstrumentKind::Index | InstrumentKind::Etf => {
                &["amplitude", "change_rate", "change_amount", "turnover_rate"]
            }
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstrumentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" | "stocks" => Ok(InstrumentKind::Stock),
            "index" | "indices" => Ok(InstrumentKind::Index),
            "etf" | "etfs" => Ok(InstrumentKind::Etf),
            other => Err(DomainError::UnknownKind(other.to_string())),
        }
    }
}
