use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain_types::{Instrument, InstrumentKind, INDEX_MEMBERSHIP_YEARS};
use crate::storage::error::StorageResult;
use crate::storage::models::InstrumentRecord;
use crate::storage::repository::{DbExecutor, InstrumentRegistry};

/// PostgreSQL 商品資訊存取
pub struct PgInstrumentRegistry {
    pool: PgPool,
}

impl PgInstrumentRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgInstrumentRegistry {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InstrumentRegistry for PgInstrumentRegistry {
    async fn list_instruments(&self, kind: InstrumentKind) -> StorageResult<Vec<Instrument>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY symbol",
            InstrumentRecord::select_columns(kind),
            kind.info_table()
        );
        let records: Vec<InstrumentRecord> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(records.into_iter().map(|r| r.into_instrument(kind)).collect())
    }

    async fn get_instrument(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> StorageResult<Option<Instrument>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE symbol = $1",
            InstrumentRecord::select_columns(kind),
            kind.info_table()
        );
        let record: Option<InstrumentRecord> = sqlx::query_as(&sql)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(|r| r.into_instrument(kind)))
    }

    async fn upsert_instruments(&self, instruments: &[Instrument]) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;

        for inst in instruments {
            if inst.kind == InstrumentKind::Stock {
                // 成分欄位只在上游提供時覆寫
                let sql = format!(
                    "INSERT INTO stock_info (symbol, name, index_2020, index_2021, index_2022, index_2023, index_2024) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     ON CONFLICT (symbol) DO UPDATE SET name = EXCLUDED.name{}",
                    INDEX_MEMBERSHIP_YEARS
                        .iter()
                        .map(|y| format!(
                            ", index_{y} = COALESCE(EXCLUDED.index_{y}, stock_info.index_{y})"
                        ))
                        .collect::<String>()
                );
                let mut query = sqlx::query(&sql).bind(&inst.symbol).bind(&inst.name);
                for year in INDEX_MEMBERSHIP_YEARS {
                    query = query.bind(inst.index_for_year(year));
                }
                query.execute(&mut *tx).await?;
            } else {
                let sql = format!(
                    "INSERT INTO {} (symbol, name) VALUES ($1, $2) \
                     ON CONFLICT (symbol) DO UPDATE SET name = EXCLUDED.name",
                    inst.kind.info_table()
                );
                sqlx::query(&sql)
                    .bind(&inst.symbol)
                    .bind(&inst.name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(instruments.len())
    }
}
