use sqlx::{migrate::Migrator, PgPool};
use tracing::info;

use crate::storage::error::StorageResult;

// 靜態嵌入遷移目錄（此目錄位於專案根目錄）
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// 執行數據庫遷移
pub async fn run_migrations(pool: &PgPool) -> StorageResult<()> {
    info!("開始執行數據庫遷移...");
    MIGRATOR.run(pool).await?;
    info!("數據庫遷移完成");
    Ok(())
}

/// 列出嵌入的遷移及其是否已套用
pub async fn migration_status(pool: &PgPool) -> StorageResult<Vec<(i64, String, bool)>> {
    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success")
        .fetch_all(pool)
        .await
        .unwrap_or_default();

    Ok(MIGRATOR
        .iter()
        .map(|m| (m.version, m.description.to_string(), applied.contains(&m.version)))
        .collect())
}
