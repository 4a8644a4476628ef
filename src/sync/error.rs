use thiserror::Error;

use crate::domain_types::{DateWindow, InstrumentKind};
use crate::source::SourceError;
use crate::storage::StorageError;

/// 同步錯誤，記錄在單一商品的結果中
#[derive(Debug, Error)]
pub enum SyncError {
    /// 重試用盡或不可重試的上游錯誤
    #[error("{symbol} 取得數據失敗（{}，嘗試 {attempts} 次）: {cause}", describe_window(.window))]
    FetchFailed {
        symbol: String,
        window: Option<DateWindow>,
        attempts: u32,
        cause: SourceError,
    },

    #[error("{symbol} 寫入衝突: {message}")]
    StorageConflict { symbol: String, message: String },

    #[error("{symbol} 衍生數據不一致: {message}")]
    DerivedInconsistency { symbol: String, message: String },

    #[error("商品資訊表中沒有 {kind} {symbol}")]
    UnknownSymbol { kind: InstrumentKind, symbol: String },

    #[error("儲存錯誤: {0}")]
    Storage(#[from] StorageError),

    #[error("無效的請求: {0}")]
    InvalidRequest(String),

    #[error("內部錯誤: {0}")]
    Internal(String),
}

fn describe_window(window: &Option<DateWindow>) -> String {
    match window {
        Some(w) => w.to_string(),
        None => "無日期區間".to_string(),
    }
}

impl SyncError {
    /// 將儲存錯誤歸類到商品層級的錯誤
    pub fn from_storage(symbol: &str, err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => SyncError::StorageConflict {
                symbol: symbol.to_string(),
                message,
            },
            StorageError::Inconsistency(message) => SyncError::DerivedInconsistency {
                symbol: symbol.to_string(),
                message,
            },
            other => SyncError::Storage(other),
        }
    }

    /// 指標與日誌使用的簡短分類
    pub fn label(&self) -> &'static str {
        match self {
            SyncError::FetchFailed { .. } => "fetch_failed",
            SyncError::StorageConflict { .. } => "storage_conflict",
            SyncError::DerivedInconsistency { .. } => "derived_inconsistency",
            SyncError::UnknownSymbol { .. } => "unknown_symbol",
            SyncError::Storage(_) => "storage",
            SyncError::InvalidRequest(_) => "invalid_request",
            SyncError::Internal(_) => "internal",
        }
    }
}
