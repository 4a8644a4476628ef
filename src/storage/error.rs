use thiserror::Error;

/// 儲存層錯誤
#[derive(Debug, Error)]
pub enum StorageError {
    /// 序列化失敗或死鎖，整個交易可以重試
    #[error("交易衝突: {0}")]
    Conflict(String),

    /// 原始數據與衍生數據的不變式被破壞
    #[error("數據不一致: {0}")]
    Inconsistency(String),

    #[error("數據庫錯誤: {0}")]
    Database(#[source] sqlx::Error),

    #[error("數據庫遷移失敗: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 儲存層結果類型
pub type StorageResult<T> = Result<T, StorageError>;

/// PostgreSQL 的序列化失敗與死鎖錯誤碼
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if RETRYABLE_SQLSTATES.contains(&code.as_ref()) {
                    return StorageError::Conflict(db_err.message().to_string());
                }
            }
        }
        StorageError::Database(err)
    }
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}
