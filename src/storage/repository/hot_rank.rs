use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain_types::HotRank;
use crate::storage::error::StorageResult;
use crate::storage::models::HotRankRecord;
use crate::storage::repository::{DbExecutor, HotRankStore};

/// PostgreSQL 熱度排名存取
pub struct PgHotRankStore {
    pool: PgPool,
}

impl PgHotRankStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgHotRankStore {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HotRankStore for PgHotRankStore {
    async fn upsert_hot_ranks(&self, ranks: &[HotRank]) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;

        for rank in ranks {
            sqlx::query(
                r#"
                INSERT INTO stock_hot_rank (symbol, date, rank, new_fans_ratio, loyal_fans_ratio)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (symbol, date) DO UPDATE SET
                    rank = EXCLUDED.rank,
                    new_fans_ratio = EXCLUDED.new_fans_ratio,
                    loyal_fans_ratio = EXCLUDED.loyal_fans_ratio
                "#,
            )
            .bind(&rank.symbol)
            .bind(rank.date)
            .bind(rank.rank)
            .bind(rank.new_fans_ratio)
            .bind(rank.loyal_fans_ratio)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ranks.len())
    }

    async fn load_hot_ranks(&self, symbol: &str) -> StorageResult<Vec<HotRank>> {
        let records: Vec<HotRankRecord> = sqlx::query_as(
            r#"
            SELECT symbol, date, rank, new_fans_ratio, loyal_fans_ratio
            FROM stock_hot_rank
            WHERE symbol = $1
            ORDER BY date
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(HotRank::from).collect())
    }
}
