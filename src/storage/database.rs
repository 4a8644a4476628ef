use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::storage::error::StorageResult;

/// 全局資料庫連接池
static DB_POOL: OnceCell<PgPool> = OnceCell::const_new();

/// 資料庫池類型
pub type DatabasePool = PgPool;

/// 由配置建立連接選項
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(&config.password)
        .database(&config.database)
        .disable_statement_logging()
}

/// 初始化資料庫連接池
pub async fn init_pool(config: &DatabaseConfig) -> StorageResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(config.max_lifetime())
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .connect_with(connect_options(config))
        .await?;

    // 測試連接
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(
        host = %config.host,
        database = %config.database,
        max_connections = config.max_connections,
        "資料庫連接池初始化完成"
    );

    Ok(pool)
}

/// 獲取全局資料庫連接池，首次呼叫時初始化
pub async fn get_db_pool(config: &DatabaseConfig) -> StorageResult<&'static PgPool> {
    DB_POOL.get_or_try_init(|| init_pool(config)).await
}

/// 健康檢查
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
}
