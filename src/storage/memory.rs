//! 記憶體儲存實作
//!
//! 與 PostgreSQL 實作相同的交易語義：每個 (類別, 代碼) 一把鎖，
//! 交易在工作副本上修改，提交時整批寫回。用於測試與 `--dry-run`。

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain_types::{DailyBar, DateWindow, DerivedBar, HotRank, Instrument, InstrumentKind};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::repository::{BarTransaction, DailyBarStore, HotRankStore, InstrumentRegistry};

/// 單一商品的數據
#[derive(Debug, Clone, Default)]
pub struct SymbolTables {
    pub bars: BTreeMap<NaiveDate, DailyBar>,
    pub derived: BTreeMap<NaiveDate, DerivedBar>,
}

type SymbolKey = (InstrumentKind, String);

/// 記憶體市場數據儲存
#[derive(Clone, Default)]
pub struct InMemoryMarketStore {
    symbols: Arc<Mutex<HashMap<SymbolKey, Arc<AsyncMutex<SymbolTables>>>>>,
    instruments: Arc<Mutex<BTreeMap<SymbolKey, Instrument>>>,
    hot_ranks: Arc<Mutex<BTreeMap<(String, NaiveDate), HotRank>>>,
    /// 注入的提交衝突次數
    injected_conflicts: Arc<Mutex<HashMap<SymbolKey, usize>>>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: InstrumentKind, symbol: &str) -> Arc<AsyncMutex<SymbolTables>> {
        self.symbols
            .lock()
            .entry((kind, symbol.to_string()))
            .or_default()
            .clone()
    }

    /// 只讀路徑使用，不為未知的商品建立鎖
    fn existing_slot(&self, kind: InstrumentKind, symbol: &str) -> Option<Arc<AsyncMutex<SymbolTables>>> {
        self.symbols.lock().get(&(kind, symbol.to_string())).cloned()
    }

    /// 取得商品數據的快照
    pub async fn snapshot(&self, kind: InstrumentKind, symbol: &str) -> SymbolTables {
        match self.existing_slot(kind, symbol) {
            Some(slot) => slot.lock().await.clone(),
            None => SymbolTables::default(),
        }
    }

    /// 直接寫入原始數據，不經過衍生數據維護（用於模擬既有數據）
    pub async fn seed_bars(&self, kind: InstrumentKind, bars: &[DailyBar]) {
        for bar in bars {
            let slot = self.slot(kind, &bar.symbol);
            slot.lock().await.bars.insert(bar.date, bar.clone());
        }
    }

    /// 直接寫入衍生數據
    pub async fn seed_derived(&self, kind: InstrumentKind, rows: &[DerivedBar]) {
        for row in rows {
            let slot = self.slot(kind, &row.symbol);
            slot.lock().await.derived.insert(row.date, row.clone());
        }
    }

    /// 直接移除衍生數據（用於模擬不一致狀態）
    pub async fn remove_derived(&self, kind: InstrumentKind, symbol: &str, date: NaiveDate) {
        self.slot(kind, symbol).lock().await.derived.remove(&date);
    }

    /// 讓接下來 `times` 次提交回報衝突，股票的熱度排名寫入也適用
    pub fn inject_conflicts(&self, kind: InstrumentKind, symbol: &str, times: usize) {
        self.injected_conflicts
            .lock()
            .insert((kind, symbol.to_string()), times);
    }

    fn take_injected_conflict(&self, key: &SymbolKey) -> bool {
        let mut conflicts = self.injected_conflicts.lock();
        match conflicts.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DailyBarStore for InMemoryMarketStore {
    async fn begin(&self, kind: InstrumentKind, symbol: &str) -> StorageResult<Box<dyn BarTransaction>> {
        let guard = self.slot(kind, symbol).lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryBarTransaction {
            store: self.clone(),
            guard,
            working,
            kind,
            symbol: symbol.to_string(),
        }))
    }

    async fn stored_range(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> StorageResult<Option<(NaiveDate, NaiveDate)>> {
        let Some(slot) = self.existing_slot(kind, symbol) else {
            return Ok(None);
        };
        let tables = slot.lock().await;
        let first = tables.bars.keys().next().copied();
        let last = tables.bars.keys().next_back().copied();
        Ok(first.zip(last))
    }

    async fn stored_dates(&self, kind: InstrumentKind, symbol: &str) -> StorageResult<Vec<NaiveDate>> {
        let Some(slot) = self.existing_slot(kind, symbol) else {
            return Ok(Vec::new());
        };
        let tables = slot.lock().await;
        Ok(tables.bars.keys().copied().collect())
    }

    async fn load_bars(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> StorageResult<Vec<DailyBar>> {
        let Some(slot) = self.existing_slot(kind, symbol) else {
            return Ok(Vec::new());
        };
        let tables = slot.lock().await;
        Ok(tables
            .bars
            .range(window.start()..=window.end())
            .map(|(_, bar)| bar.clone())
            .collect())
    }

    async fn load_derived(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
    ) -> StorageResult<Vec<DerivedBar>> {
        let Some(slot) = self.existing_slot(kind, symbol) else {
            return Ok(Vec::new());
        };
        let tables = slot.lock().await;
        Ok(tables
            .derived
            .range(window.start()..=window.end())
            .map(|(_, row)| row.clone())
            .collect())
    }
}

/// 記憶體交易，持有商品鎖直到提交或丟棄
pub struct InMemoryBarTransaction {
    store: InMemoryMarketStore,
    guard: OwnedMutexGuard<SymbolTables>,
    working: SymbolTables,
    kind: InstrumentKind,
    symbol: String,
}

#[async_trait]
impl BarTransaction for InMemoryBarTransaction {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn get_bar(&mut self, date: NaiveDate) -> StorageResult<Option<DailyBar>> {
        Ok(self.working.bars.get(&date).cloned())
    }

    async fn previous_priced_bar(&mut self, before: NaiveDate) -> StorageResult<Option<DailyBar>> {
        Ok(self
            .working
            .bars
            .range(..before)
            .rev()
            .map(|(_, bar)| bar)
            .find(|bar| bar.is_priced())
            .cloned())
    }

    async fn next_priced_bar(&mut self, after: NaiveDate) -> StorageResult<Option<DailyBar>> {
        Ok(self
            .working
            .bars
            .range(after..)
            .map(|(_, bar)| bar)
            .find(|bar| bar.date > after && bar.is_priced())
            .cloned())
    }

    async fn put_bar(&mut self, bar: &DailyBar) -> StorageResult<()> {
        let mut stored = bar.clone().normalized_for(self.kind);
        stored.symbol = self.symbol.clone();
        self.working.bars.insert(bar.date, stored);
        Ok(())
    }

    async fn delete_bar(&mut self, date: NaiveDate) -> StorageResult<bool> {
        Ok(self.working.bars.remove(&date).is_some())
    }

    async fn get_derived(&mut self, date: NaiveDate) -> StorageResult<Option<DerivedBar>> {
        Ok(self.working.derived.get(&date).cloned())
    }

    async fn put_derived(&mut self, derived: &DerivedBar) -> StorageResult<()> {
        // 與外鍵約束對應
        if !self.working.bars.contains_key(&derived.date) {
            return Err(StorageError::Inconsistency(format!(
                "{} {} 沒有對應的原始數據，無法寫入衍生數據",
                self.symbol, derived.date
            )));
        }
        let mut row = derived.clone();
        row.symbol = self.symbol.clone();
        self.working.derived.insert(derived.date, row);
        Ok(())
    }

    async fn delete_derived(&mut self, date: NaiveDate) -> StorageResult<bool> {
        Ok(self.working.derived.remove(&date).is_some())
    }

    async fn bars_in_window(&mut self, window: DateWindow) -> StorageResult<Vec<DailyBar>> {
        Ok(self
            .working
            .bars
            .range(window.start()..=window.end())
            .map(|(_, bar)| bar.clone())
            .collect())
    }

    async fn all_bars(&mut self) -> StorageResult<Vec<DailyBar>> {
        Ok(self.working.bars.values().cloned().collect())
    }

    async fn all_derived(&mut self) -> StorageResult<Vec<DerivedBar>> {
        Ok(self.working.derived.values().cloned().collect())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        let key = (this.kind, this.symbol.clone());
        if this.store.take_injected_conflict(&key) {
            return Err(StorageError::Conflict(format!(
                "{} {} 提交時發生序列化衝突",
                this.kind, this.symbol
            )));
        }
        let mut guard = this.guard;
        *guard = this.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl InstrumentRegistry for InMemoryMarketStore {
    async fn list_instruments(&self, kind: InstrumentKind) -> StorageResult<Vec<Instrument>> {
        Ok(self
            .instruments
            .lock()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, inst)| inst.clone())
            .collect())
    }

    async fn get_instrument(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> StorageResult<Option<Instrument>> {
        Ok(self
            .instruments
            .lock()
            .get(&(kind, symbol.to_string()))
            .cloned())
    }

    async fn upsert_instruments(&self, instruments: &[Instrument]) -> StorageResult<usize> {
        let mut registry = self.instruments.lock();
        for inst in instruments {
            let key = (inst.kind, inst.symbol.clone());
            match registry.get_mut(&key) {
                Some(existing) => {
                    existing.name = inst.name.clone();
                    for (year, code) in &inst.index_membership {
                        existing.index_membership.insert(*year, code.clone());
                    }
                }
                None => {
                    registry.insert(key, inst.clone());
                }
            }
        }
        Ok(instruments.len())
    }
}

#[async_trait]
impl HotRankStore for InMemoryMarketStore {
    async fn upsert_hot_ranks(&self, ranks: &[HotRank]) -> StorageResult<usize> {
        if let Some(first) = ranks.first() {
            if self.take_injected_conflict(&(InstrumentKind::Stock, first.symbol.clone())) {
                return Err(StorageError::Conflict(format!("{} 熱度排名寫入衝突（注入）", first.symbol)));
            }
        }
        let mut table = self.hot_ranks.lock();
        for rank in ranks {
            table.insert((rank.symbol.clone(), rank.date), rank.clone());
        }
        Ok(ranks.len())
    }

    async fn load_hot_ranks(&self, symbol: &str) -> StorageResult<Vec<HotRank>> {
        Ok(self
            .hot_ranks
            .lock()
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .map(|(_, rank)| rank.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, close: Option<f64>) -> DailyBar {
        DailyBar::empty("sz000001", day(d)).with_close(close)
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let store = InMemoryMarketStore::new();
        let mut tx = store.begin(InstrumentKind::Stock, "sz000001").await.unwrap();
        tx.put_bar(&bar(2, Some(10.0))).await.unwrap();
        drop(tx);

        let snap = store.snapshot(InstrumentKind::Stock, "sz000001").await;
        assert!(snap.bars.is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = InMemoryMarketStore::new();
        let mut tx = store.begin(InstrumentKind::Stock, "sz000001").await.unwrap();
        tx.put_bar(&bar(2, Some(10.0))).await.unwrap();
        tx.put_derived(&DerivedBar::new("sz000001", day(2), None)).await.unwrap();
        tx.commit().await.unwrap();

        let range = store.stored_range(InstrumentKind::Stock, "sz000001").await.unwrap();
        assert_eq!(range, Some((day(2), day(2))));
        let snap = store.snapshot(InstrumentKind::Stock, "sz000001").await;
        assert_eq!(snap.derived.len(), 1);
    }

    #[tokio::test]
    async fn test_priced_neighbours_skip_placeholders() {
        let store = InMemoryMarketStore::new();
        store
            .seed_bars(
                InstrumentKind::Index,
                &[bar(2, Some(1.0)), bar(3, None), bar(4, Some(2.0))],
            )
            .await;
        let mut tx = store.begin(InstrumentKind::Index, "sz000001").await.unwrap();
        let prev = tx.previous_priced_bar(day(4)).await.unwrap().unwrap();
        assert_eq!(prev.date, day(2));
        let next = tx.next_priced_bar(day(2)).await.unwrap().unwrap();
        assert_eq!(next.date, day(4));
        assert!(tx.next_priced_bar(day(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_derived_requires_raw_row() {
        let store = InMemoryMarketStore::new();
        let mut tx = store.begin(InstrumentKind::Etf, "510300").await.unwrap();
        let err = tx
            .put_derived(&DerivedBar::new("510300", day(5), Some(0.1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Inconsistency(_)));
    }

    #[tokio::test]
    async fn test_transactions_on_same_symbol_are_serialized() {
        let store = InMemoryMarketStore::new();
        let tx = store.begin(InstrumentKind::Stock, "sz000001").await.unwrap();

        let other = store.clone();
        let waiter = tokio::spawn(async move {
            let _tx = other.begin(InstrumentKind::Stock, "sz000001").await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // 其他商品不受影響
        let _unrelated = store.begin(InstrumentKind::Stock, "sh600000").await.unwrap();

        drop(tx);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_conflict_fails_commit_once() {
        let store = InMemoryMarketStore::new();
        store.inject_conflicts(InstrumentKind::Stock, "sz000001", 1);

        let mut tx = store.begin(InstrumentKind::Stock, "sz000001").await.unwrap();
        tx.put_bar(&bar(2, Some(1.0))).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_conflict());

        let mut tx = store.begin(InstrumentKind::Stock, "sz000001").await.unwrap();
        tx.put_bar(&bar(2, Some(1.0))).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_reads_of_unknown_symbols_do_not_allocate() {
        let store = InMemoryMarketStore::new();
        let window = DateWindow::new(day(1), day(31)).unwrap();
        for symbol in ["A", "B", "C"] {
            assert!(store.stored_range(InstrumentKind::Stock, symbol).await.unwrap().is_none());
            assert!(store.stored_dates(InstrumentKind::Stock, symbol).await.unwrap().is_empty());
            assert!(store.load_bars(InstrumentKind::Stock, symbol, window).await.unwrap().is_empty());
            assert!(store.load_derived(InstrumentKind::Stock, symbol, window).await.unwrap().is_empty());
            assert!(store.snapshot(InstrumentKind::Stock, symbol).await.bars.is_empty());
        }
        assert!(store.symbols.lock().is_empty());
    }

    #[tokio::test]
    async fn test_instrument_upsert_merges_membership() {
        let store = InMemoryMarketStore::new();
        let mut first = Instrument::new(InstrumentKind::Stock, "sh600000", "浦发银行");
        first.index_membership.insert(2020, "000300".to_string());
        store.upsert_instruments(&[first]).await.unwrap();

        let renamed = Instrument::new(InstrumentKind::Stock, "sh600000", "浦发");
        store.upsert_instruments(&[renamed]).await.unwrap();

        let inst = store
            .get_instrument(InstrumentKind::Stock, "sh600000")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inst.name, "浦发");
        assert_eq!(inst.index_for_year(2020), Some("000300"));
        assert!(store.list_instruments(InstrumentKind::Etf).await.unwrap().is_empty());
    }
}
