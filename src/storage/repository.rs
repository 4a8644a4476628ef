use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::domain_types::{DailyBar, DateWindow, DerivedBar, HotRank, Instrument, InstrumentKind};
use crate::storage::error::StorageResult;

pub mod daily_bar;
pub mod hot_rank;
pub mod instrument;

pub use daily_bar::{PgBarTransaction, PgDailyBarStore};
pub use hot_rank::PgHotRankStore;
pub use instrument::PgInstrumentRegistry;

/// 通用的數據庫操作特性
pub trait DbExecutor {
    fn get_pool(&self) -> &PgPool;
}

/// 單一商品的日線寫入交易
///
/// 一個交易只涵蓋一個 (類別, 代碼)。原始數據與衍生數據的變更在
/// `commit` 前對其他交易不可見，`rollback` 或直接丟棄即放棄所有變更。
#[async_trait]
pub trait BarTransaction: Send {
    fn kind(&self) -> InstrumentKind;

    fn symbol(&self) -> &str;

    async fn get_bar(&mut self, date: NaiveDate) -> StorageResult<Option<DailyBar>>;

    /// `before` 之前最近一筆有收盤價的數據
    async fn previous_priced_bar(&mut self, before: NaiveDate) -> StorageResult<Option<DailyBar>>;

    /// `after` 之後最近一筆有收盤價的數據
    async fn next_priced_bar(&mut self, after: NaiveDate) -> StorageResult<Option<DailyBar>>;

    /// 插入或覆寫
    async fn put_bar(&mut self, bar: &DailyBar) -> StorageResult<()>;

    async fn delete_bar(&mut self, date: NaiveDate) -> StorageResult<bool>;

    async fn get_derived(&mut self, date: NaiveDate) -> StorageResult<Option<DerivedBar>>;

    async fn put_derived(&mut self, derived: &DerivedBar) -> StorageResult<()>;

    async fn delete_derived(&mut self, date: NaiveDate) -> StorageResult<bool>;

    /// 區間內的日線（遞增）
    async fn bars_in_window(&mut self, window: DateWindow) -> StorageResult<Vec<DailyBar>>;

    /// 依日期遞增的全部日線
    async fn all_bars(&mut self) -> StorageResult<Vec<DailyBar>>;

    /// 依日期遞增的全部衍生數據
    async fn all_derived(&mut self) -> StorageResult<Vec<DerivedBar>>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// 日線數據存取接口
#[async_trait]
pub trait DailyBarStore: Send + Sync {
    /// 開啟單一商品的寫入交易，同一商品的交易互斥
    async fn begin(&self, kind: InstrumentKind, symbol: &str) -> StorageResult<Box<dyn BarTransaction>>;

    /// 已儲存的最早與最晚日期
    async fn stored_range(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> StorageResult<Option<(NaiveDate, NaiveDate)>>;

    /// 已儲存的日期（遞增）
    async fn stored_dates(&self, kind: InstrumentKind, symbol: &str) -> StorageResult<Vec<NaiveDate>>;

    async fn load_bars(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> StorageResult<Vec<DailyBar>>;

    async fn load_derived(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> StorageResult<Vec<DerivedBar>>;
}

/// 商品資訊存取接口
#[async_trait]
pub trait InstrumentRegistry: Send + Sync {
    async fn list_instruments(&self, kind: InstrumentKind) -> StorageResult<Vec<Instrument>>;

    async fn get_instrument(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> StorageResult<Option<Instrument>>;

    /// 插入或更新名稱與指數成分，返回處理的筆數
    async fn upsert_instruments(&self, instruments: &[Instrument]) -> StorageResult<usize>;
}

/// 熱度排名存取接口
#[async_trait]
pub trait HotRankStore: Send + Sync {
    /// 以 (代碼, 日期) 為鍵插入或更新，返回處理的筆數
    async fn upsert_hot_ranks(&self, ranks: &[HotRank]) -> StorageResult<usize>;

    async fn load_hot_ranks(&self, symbol: &str) -> StorageResult<Vec<HotRank>>;
}
