// time_utils.rs
//
// 日期相關的工具函數：上游 API 的日期格式轉換與交易日判斷。

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Weekday};

use crate::domain_types::DomainError;

/// 上游 API 使用的緊湊日期格式
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

/// 將日期轉換為 `YYYYMMDD`
pub fn to_compact_date(date: NaiveDate) -> String {
    date.format(COMPACT_DATE_FORMAT).to_string()
}

/// 解析上游回傳的日期字串
///
/// 接受 `2024-01-02`、`20240102`、`2024/01/02` 以及帶時間的
/// `2024-01-02T00:00:00.000`、`2024-01-02 00:00:00` 等格式。
pub fn parse_flexible_date(raw: &str) -> Result<NaiveDate, DomainError> {
    let s = raw.trim();
    for fmt in ["%Y-%m-%d", COMPACT_DATE_FORMAT, "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    // 帶時區的 ISO 格式只取日期部分
    if s.len() > 10 && s.is_char_boundary(10) {
        if let Ok(date) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Ok(date);
        }
    }
    Err(DomainError::InvalidDate(raw.to_string()))
}

/// 當地今日日期
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
