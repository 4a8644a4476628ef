//! 上游 JSON 記錄解析
//!
//! AKTools 依 akshare 函數不同回傳英文或中文欄位名，這裡以別名表統一處理。

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::domain_types::{DailyBar, HotRank, Instrument, InstrumentKind};
use crate::source::SourceError;
use crate::utils::parse_flexible_date;

type Record = Map<String, Value>;

const DATE_KEYS: &[&str] = &["date", "日期"];
const OPEN_KEYS: &[&str] = &["open", "开盘"];
const CLOSE_KEYS: &[&str] = &["close", "收盘"];
const HIGH_KEYS: &[&str] = &["high", "最高"];
const LOW_KEYS: &[&str] = &["low", "最低"];
const VOLUME_KEYS: &[&str] = &["volume", "成交量"];
const AMOUNT_KEYS: &[&str] = &["amount", "成交额"];
const AMPLITUDE_KEYS: &[&str] = &["amplitude", "振幅"];
const CHANGE_RATE_KEYS: &[&str] = &["change_rate", "涨跌幅"];
const CHANGE_AMOUNT_KEYS: &[&str] = &["change_amount", "涨跌额"];
const TURNOVER_RATE_KEYS: &[&str] = &["turnover_rate", "换手率"];
const OUTSTANDING_SHARE_KEYS: &[&str] = &["outstanding_share"];
const TURNOVER_KEYS: &[&str] = &["turnover"];

const CODE_KEYS: &[&str] = &["code", "代码", "symbol"];
const NAME_KEYS: &[&str] = &["name", "名称"];

const TRADE_DATE_KEYS: &[&str] = &["trade_date", "日期"];

const HOT_RANK_DATE_KEYS: &[&str] = &["时间", "date"];
const HOT_RANK_RANK_KEYS: &[&str] = &["排名", "rank"];
const HOT_RANK_NEW_FANS_KEYS: &[&str] = &["新晋粉丝", "new_fans_ratio"];
const HOT_RANK_LOYAL_FANS_KEYS: &[&str] = &["铁杆粉丝", "loyal_fans_ratio"];

fn lookup<'a>(record: &'a Record, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| record.get(*k))
}

/// 解析可為空的數值欄位，`null`、空字串與 `-` 視為空值
fn optional_f64(record: &Record, keys: &[&str]) -> Result<Option<f64>, SourceError> {
    match lookup(record, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| SourceError::DataInvalid(format!("{} 不是數值: {}", keys[0], n))),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "-" {
                return Ok(None);
            }
            trimmed
                .replace(',', "")
                .parse::<f64>()
                .map(Some)
                .map_err(|_| SourceError::DataInvalid(format!("{} 不是數值: {:?}", keys[0], s)))
        }
        Some(other) => Err(SourceError::DataInvalid(format!(
            "{} 不是數值: {}",
            keys[0], other
        ))),
    }
}

/// 成交量允許以浮點數表示，但必須為有限值
fn optional_i64(record: &Record, keys: &[&str]) -> Result<Option<i64>, SourceError> {
    match optional_f64(record, keys)? {
        None => Ok(None),
        Some(v) if v.is_finite() => Ok(Some(v.round() as i64)),
        Some(v) => Err(SourceError::DataInvalid(format!("{} 不是有限數值: {}", keys[0], v))),
    }
}

fn required_string(record: &Record, keys: &[&str]) -> Result<String, SourceError> {
    match lookup(record, keys) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(SourceError::DataInvalid(format!("缺少欄位 {}", keys[0]))),
    }
}

fn required_date(record: &Record, keys: &[&str]) -> Result<NaiveDate, SourceError> {
    let raw = required_string(record, keys)?;
    parse_flexible_date(&raw).map_err(|e| SourceError::DataInvalid(e.to_string()))
}

/// 將一筆日線記錄轉換為 `DailyBar`，只保留該類別存在的欄位
pub fn parse_daily_bar(kind: InstrumentKind, symbol: &str, value: &Value) -> Result<DailyBar, SourceError> {
    let record = value
        .as_object()
        .ok_or_else(|| SourceError::DataInvalid(format!("記錄不是物件: {}", value)))?;

    let bar = DailyBar {
        symbol: symbol.to_string(),
        date: required_date(record, DATE_KEYS)?,
        open: optional_f64(record, OPEN_KEYS)?,
        close: optional_f64(record, CLOSE_KEYS)?,
        high: optional_f64(record, HIGH_KEYS)?,
        low: optional_f64(record, LOW_KEYS)?,
        volume: optional_i64(record, VOLUME_KEYS)?,
        amount: optional_f64(record, AMOUNT_KEYS)?,
        amplitude: optional_f64(record, AMPLITUDE_KEYS)?,
        change_rate: optional_f64(record, CHANGE_RATE_KEYS)?,
        change_amount: optional_f64(record, CHANGE_AMOUNT_KEYS)?,
        turnover_rate: optional_f64(record, TURNOVER_RATE_KEYS)?,
        outstanding_share: optional_f64(record, OUTSTANDING_SHARE_KEYS)?,
        turnover: optional_f64(record, TURNOVER_KEYS)?,
    };
    Ok(bar.normalized_for(kind))
}

/// 解析商品清單記錄
pub fn parse_instrument(kind: InstrumentKind, value: &Value) -> Result<Instrument, SourceError> {
    let record = value
        .as_object()
        .ok_or_else(|| SourceError::DataInvalid(format!("記錄不是物件: {}", value)))?;
    let symbol = required_string(record, CODE_KEYS)?;
    let name = required_string(record, NAME_KEYS)?;
    Ok(Instrument::new(kind, symbol, name))
}

/// 解析熱度排名記錄
pub fn parse_hot_rank(symbol: &str, value: &Value) -> Result<HotRank, SourceError> {
    let record = value
        .as_object()
        .ok_or_else(|| SourceError::DataInvalid(format!("記錄不是物件: {}", value)))?;
    let date = required_date(record, HOT_RANK_DATE_KEYS)?;
    let rank = optional_i64(record, HOT_RANK_RANK_KEYS)?
        .ok_or_else(|| SourceError::DataInvalid("缺少排名".to_string()))?;
    let rank = i32::try_from(rank)
        .map_err(|_| SourceError::DataInvalid(format!("排名超出範圍: {}", rank)))?;
    Ok(HotRank::new(
        symbol,
        date,
        rank,
        optional_f64(record, HOT_RANK_NEW_FANS_KEYS)?,
        optional_f64(record, HOT_RANK_LOYAL_FANS_KEYS)?,
    ))
}

/// 解析交易日曆記錄
pub fn parse_trade_date(value: &Value) -> Result<NaiveDate, SourceError> {
    let record = value
        .as_object()
        .ok_or_else(|| SourceError::DataInvalid(format!("記錄不是物件: {}", value)))?;
    required_date(record, TRADE_DATE_KEYS)
}

/// 股票代碼的交易所前綴（小寫），已帶前綴時沿用
pub fn exchange_prefix(code: &str) -> Option<&'static str> {
    let lower = code.to_ascii_lowercase();
    for prefix in ["sh", "sz", "bj"] {
        if lower.starts_with(prefix) {
            return Some(prefix);
        }
    }
    match code.chars().next()? {
        '5' | '6' | '9' => Some("sh"),
        '0' | '1' | '2' | '3' => Some("sz"),
        '4' | '8' => Some("bj"),
        _ => None,
    }
}

/// 去除交易所前綴的純數字代碼
pub fn bare_code(code: &str) -> &str {
    let lower = code.to_ascii_lowercase();
    if ["sh", "sz", "bj"].iter().any(|p| lower.starts_with(p)) {
        &code[2..]
    } else {
        code
    }
}

/// `stock_zh_a_daily` 使用的代碼，例如 `sz000001`
pub fn daily_stock_symbol(code: &str) -> String {
    match exchange_prefix(code) {
        Some(prefix) => format!("{}{}", prefix, bare_code(code)),
        None => code.to_string(),
    }
}

/// `stock_hot_rank_detail_em` 使用的代碼，北交所以 `SZ` 前綴查詢
pub fn hot_rank_symbol(code: &str) -> String {
    let prefix = match exchange_prefix(code) {
        Some("bj") | Some("sz") => "SZ",
        Some("sh") => "SH",
        _ => return code.to_ascii_uppercase(),
    };
    format!("{}{}", prefix, bare_code(code))
}
