use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain_types::{Instrument, InstrumentKind, INDEX_MEMBERSHIP_YEARS};

/// 商品資訊列，僅 `stock_info` 有年度指數欄位
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub name: String,
    pub index_2020: Option<String>,
    pub index_2021: Option<String>,
    pub index_2022: Option<String>,
    pub index_2023: Option<String>,
    pub index_2024: Option<String>,
}

impl InstrumentRecord {
    pub fn select_columns(kind: InstrumentKind) -> String {
        let mut columns = vec!["symbol".to_string(), "name".to_string()];
        for year in INDEX_MEMBERSHIP_YEARS {
            if kind == InstrumentKind::Stock {
                columns.push(format!("index_{}", year));
            } else {
                columns.push(format!("NULL::VARCHAR AS index_{}", year));
            }
        }
        columns.join(", ")
    }

    pub fn into_instrument(self, kind: InstrumentKind) -> Instrument {
        let mut index_membership = BTreeMap::new();
        let years = [
            self.index_2020,
            self.index_2021,
            self.index_2022,
            self.index_2023,
            self.index_2024,
        ];
        for (year, code) in INDEX_MEMBERSHIP_YEARS.iter().zip(years) {
            if let Some(code) = code {
                index_membership.insert(*year, code);
            }
        }
        Instrument {
            kind,
            symbol: self.symbol,
            name: self.name,
            index_membership,
        }
    }
}
