use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::domain_types::{DailyBar, DateWindow, DerivedBar, InstrumentKind};
use crate::storage::error::StorageResult;
use crate::storage::models::{DailyBarRecord, DerivedBarRecord};
use crate::storage::repository::{BarTransaction, DailyBarStore, DbExecutor};

/// 取得日線某個額外欄位的值
fn extra_value(bar: &DailyBar, column: &str) -> Option<f64> {
    match column {
        "amplitude" => bar.amplitude,
        "change_rate" => bar.change_rate,
        "change_amount" => bar.change_amount,
        "turnover_rate" => bar.turnover_rate,
        "outstanding_share" => bar.outstanding_share,
        "turnover" => bar.turnover,
        _ => None,
    }
}

/// 日線寫入語句，以 (symbol, date) 衝突時覆寫所有數值欄位
fn upsert_sql(kind: InstrumentKind) -> String {
    let extras = kind.extra_columns();
    let mut columns = vec!["symbol", "date", "open", "close", "high", "low", "volume", "amount"];
    columns.extend_from_slice(extras);

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let updates: Vec<String> = columns[2..]
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (symbol, date) DO UPDATE SET {}",
        kind.daily_table(),
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

/// PostgreSQL 日線數據存取
pub struct PgDailyBarStore {
    pool: PgPool,
}

impl PgDailyBarStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgDailyBarStore {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DailyBarStore for PgDailyBarStore {
    async fn begin(&self, kind: InstrumentKind, symbol: &str) -> StorageResult<Box<dyn BarTransaction>> {
        let mut tx = self.pool.begin().await?;

        // 同一 (表, 代碼) 的寫入者依序進行，鎖在交易結束時釋放
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{}", kind.daily_table(), symbol))
            .execute(&mut *tx)
            .await?;

        debug!(kind = %kind, symbol, "開啟日線寫入交易");
        Ok(Box::new(PgBarTransaction {
            tx,
            kind,
            symbol: symbol.to_string(),
        }))
    }

    async fn stored_range(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> StorageResult<Option<(NaiveDate, NaiveDate)>> {
        let sql = format!(
            "SELECT MIN(date), MAX(date) FROM {} WHERE symbol = $1",
            kind.daily_table()
        );
        let (min, max): (Option<NaiveDate>, Option<NaiveDate>) = sqlx::query_as(&sql)
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(min.zip(max))
    }

    async fn stored_dates(&self, kind: InstrumentKind, symbol: &str) -> StorageResult<Vec<NaiveDate>> {
        let sql = format!(
            "SELECT date FROM {} WHERE symbol = $1 ORDER BY date",
            kind.daily_table()
        );
        let dates = sqlx::query_scalar(&sql)
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        Ok(dates)
    }

    async fn load_bars(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> StorageResult<Vec<DailyBar>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE symbol = $1 AND date BETWEEN $2 AND $3 ORDER BY date",
            DailyBarRecord::select_columns(kind),
            kind.daily_table()
        );
        let records: Vec<DailyBarRecord> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(window.start())
            .bind(window.end())
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(DailyBar::from).collect())
    }

    async fn load_derived(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> StorageResult<Vec<DerivedBar>> {
        let sql = format!(
            "SELECT symbol, date, real_change FROM {} WHERE symbol = $1 AND date BETWEEN $2 AND $3 ORDER BY date",
            kind.derived_table()
        );
        let records: Vec<DerivedBarRecord> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(window.start())
            .bind(window.end())
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(DerivedBar::from).collect())
    }
}

/// PostgreSQL 單一商品寫入交易
pub struct PgBarTransaction {
    tx: Transaction<'static, Postgres>,
    kind: InstrumentKind,
    symbol: String,
}

impl PgBarTransaction {
    async fn fetch_bar(&mut self, condition: &str, date: NaiveDate) -> StorageResult<Option<DailyBar>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE symbol = $1 AND {}",
            DailyBarRecord::select_columns(self.kind),
            self.kind.daily_table(),
            condition
        );
        let record: Option<DailyBarRecord> = sqlx::query_as(&sql)
            .bind(&self.symbol)
            .bind(date)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(record.map(DailyBar::from))
    }
}

#[async_trait]
impl BarTransaction for PgBarTransaction {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn get_bar(&mut self, date: NaiveDate) -> StorageResult<Option<DailyBar>> {
        self.fetch_bar("date = $2", date).await
    }

    async fn previous_priced_bar(&mut self, before: NaiveDate) -> StorageResult<Option<DailyBar>> {
        self.fetch_bar(
            "date < $2 AND close IS NOT NULL ORDER BY date DESC LIMIT 1",
            before,
        )
        .await
    }

    async fn next_priced_bar(&mut self, after: NaiveDate) -> StorageResult<Option<DailyBar>> {
        self.fetch_bar("date > $2 AND close IS NOT NULL ORDER BY date ASC LIMIT 1", after)
            .await
    }

    async fn put_bar(&mut self, bar: &DailyBar) -> StorageResult<()> {
        let sql = upsert_sql(self.kind);
        let mut query = sqlx::query(&sql)
            .bind(&self.symbol)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.close)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.volume)
            .bind(bar.amount);
        for column in self.kind.extra_columns() {
            query = query.bind(extra_value(bar, column));
        }
        query.execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_bar(&mut self, date: NaiveDate) -> StorageResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE symbol = $1 AND date = $2",
            self.kind.daily_table()
        );
        let result = sqlx::query(&sql)
            .bind(&self.symbol)
            .bind(date)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_derived(&mut self, date: NaiveDate) -> StorageResult<Option<DerivedBar>> {
        let sql = format!(
            "SELECT symbol, date, real_change FROM {} WHERE symbol = $1 AND date = $2",
            self.kind.derived_table()
        );
        let record: Option<DerivedBarRecord> = sqlx::query_as(&sql)
            .bind(&self.symbol)
            .bind(date)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(record.map(DerivedBar::from))
    }

    async fn put_derived(&mut self, derived: &DerivedBar) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (symbol, date, real_change) VALUES ($1, $2, $3) \
             ON CONFLICT (symbol, date) DO UPDATE SET real_change = EXCLUDED.real_change",
            self.kind.derived_table()
        );
        sqlx::query(&sql)
            .bind(&self.symbol)
            .bind(derived.date)
            .bind(derived.real_change)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_derived(&mut self, date: NaiveDate) -> StorageResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE symbol = $1 AND date = $2",
            self.kind.derived_table()
        );
        let result = sqlx::query(&sql)
            .bind(&self.symbol)
            .bind(date)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bars_in_window(&mut self, window: DateWindow) -> StorageResult<Vec<DailyBar>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE symbol = $1 AND date BETWEEN $2 AND $3 ORDER BY date",
            DailyBarRecord::select_columns(self.kind),
            self.kind.daily_table()
        );
        let records: Vec<DailyBarRecord> = sqlx::query_as(&sql)
            .bind(&self.symbol)
            .bind(window.start())
            .bind(window.end())
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(records.into_iter().map(DailyBar::from).collect())
    }

    async fn all_bars(&mut self) -> StorageResult<Vec<DailyBar>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE symbol = $1 ORDER BY date",
            DailyBarRecord::select_columns(self.kind),
            self.kind.daily_table()
        );
        let records: Vec<DailyBarRecord> = sqlx::query_as(&sql)
            .bind(&self.symbol)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(records.into_iter().map(DailyBar::from).collect())
    }

    async fn all_derived(&mut self) -> StorageResult<Vec<DerivedBar>> {
        let sql = format!(
            "SELECT symbol, date, real_change FROM {} WHERE symbol = $1 ORDER BY date",
            self.kind.derived_table()
        );
        let records: Vec<DerivedBarRecord> = sqlx::query_as(&sql)
            .bind(&self.symbol)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(records.into_iter().map(DerivedBar::from).collect())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
