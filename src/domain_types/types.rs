//! 基本領域類型與錯誤定義

use chrono::NaiveDate;
use thiserror::Error;

/// 領域模型錯誤
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("無效的商品類別: {0}")]
    UnknownKind(String),

    #[error("無效的日期區間: {start} > {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("無效的日期: {0}")]
    InvalidDate(String),

    #[error("無效的同步模式: {0}")]
    UnknownMode(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
