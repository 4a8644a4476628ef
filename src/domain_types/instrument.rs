//! 金融商品與熱度排名結構定義

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::asset_types::InstrumentKind;

/// 股票資訊表記錄的指數成分年度
pub const INDEX_MEMBERSHIP_YEARS: [i32; 5] = [2020, 2021, 2022, 2023, 2024];

/// 金融商品定義
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub kind: InstrumentKind,
    pub symbol: String,
    pub name: String,
    /// 年度 -> 所屬指數代碼，僅股票使用
    #[serde(default)]
    pub index_membership: BTreeMap<i32, String>,
}

impl Instrument {
    pub fn new(kind: InstrumentKind, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            symbol: symbol.into(),
            name: name.into(),
            index_membership: BTreeMap::new(),
        }
    }

    /// 取得指定年度的指數成分代碼
    pub fn index_for_year(&self, year: i32) -> Option<&str> {
        self.index_membership.get(&year).map(String::as_str)
    }
}

/// 個股熱度排名（每個股票每日一筆）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotRank {
    pub symbol: String,
    pub date: NaiveDate,
    pub rank: i32,
    pub new_fans_ratio: Option<f64>,
    pub loyal_fans_ratio: Option<f64>,
}

impl HotRank {
    /// 比例保留四位小數
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        rank: i32,
        new_fans_ratio: Option<f64>,
        loyal_fans_ratio: Option<f64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            rank,
            new_fans_ratio: new_fans_ratio.map(round4),
            loyal_fans_ratio: loyal_fans_ratio.map(round4),
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
