use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain_types::HotRank;

/// 熱度排名數據列
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HotRankRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub rank: i32,
    pub new_fans_ratio: Option<f64>,
    pub loyal_fans_ratio: Option<f64>,
}

impl From<HotRankRecord> for HotRank {
    fn from(r: HotRankRecord) -> Self {
        HotRank {
            symbol: r.symbol,
            date: r.date,
            rank: r.rank,
            new_fans_ratio: r.new_fans_ratio,
            loyal_fans_ratio: r.loyal_fans_ratio,
        }
    }
}
