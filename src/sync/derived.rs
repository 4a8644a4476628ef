//! 衍生數據維護
//!
//! 每次原始日線的寫入或刪除都在同一個 `BarTransaction` 中更新 `real_change`：
//!
//! - 寫入 (S, D)：`real_change(D) = close(D) - close(P)`，P 為 D 之前最近一筆
//!   有收盤價的數據；D 沒有收盤價或找不到 P 時為空值。
//! - D 的收盤價有變化（含新增）時，重新計算 D 之後第一筆有收盤價的數據。
//! - 刪除 (S, D)：刪除衍生數據，若 D 有收盤價則重新計算其後繼者。
//!
//! 任何違反「衍生數據存在當且僅當原始數據存在」的狀態都回報
//! `StorageError::Inconsistency`，由呼叫端放棄交易。

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, error};

use crate::domain_types::{DailyBar, DerivedBar};
use crate::storage::{BarTransaction, StorageError, StorageResult};

/// 重建結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub orphans_removed: usize,
}

/// 衍生數據維護者
pub struct DerivedMaintainer;

impl DerivedMaintainer {
    /// 寫入一筆日線並維護衍生數據
    pub async fn apply_upsert(tx: &mut dyn BarTransaction, bar: &DailyBar) -> StorageResult<()> {
        let date = bar.date;
        let existing = tx.get_bar(date).await?;
        let existing_derived = tx.get_derived(date).await?;

        match (&existing, &existing_derived) {
            (Some(_), None) => {
                return Err(inconsistency(tx, date, "原始數據存在但沒有衍生數據"));
            }
            (None, Some(_)) => {
                return Err(inconsistency(tx, date, "寫入前已存在孤立的衍生數據"));
            }
            _ => {}
        }

        tx.put_bar(bar).await?;
        let real_change = Self::real_change_at(tx, date, bar.close).await?;
        let symbol = tx.symbol().to_string();
        tx.put_derived(&DerivedBar::new(symbol, date, real_change)).await?;

        let close_changed = existing.map(|b| b.close) != Some(bar.close);
        if close_changed {
            Self::recompute_successor(tx, date).await?;
        }
        Ok(())
    }

    /// 刪除一筆日線及其衍生數據，返回是否有數據被刪除
    pub async fn apply_delete(tx: &mut dyn BarTransaction, date: NaiveDate) -> StorageResult<bool> {
        let existing = tx.get_bar(date).await?;
        let has_derived = tx.get_derived(date).await?.is_some();

        let existing = match existing {
            Some(bar) => bar,
            None if has_derived => {
                return Err(inconsistency(tx, date, "衍生數據沒有對應的原始數據"));
            }
            None => return Ok(false),
        };
        if !has_derived {
            return Err(inconsistency(tx, date, "刪除的原始數據沒有衍生數據"));
        }

        tx.delete_derived(date).await?;
        tx.delete_bar(date).await?;
        if existing.is_priced() {
            Self::recompute_successor(tx, date).await?;
        }
        Ok(true)
    }

    /// 從頭重新計算整個商品的衍生數據
    pub async fn rebuild(tx: &mut dyn BarTransaction) -> StorageResult<RebuildStats> {
        let bars = tx.all_bars().await?;
        let mut derived: BTreeMap<NaiveDate, DerivedBar> = tx
            .all_derived()
            .await?
            .into_iter()
            .map(|row| (row.date, row))
            .collect();

        let mut stats = RebuildStats {
            rows: bars.len(),
            ..Default::default()
        };

        let orphans: Vec<NaiveDate> = derived
            .keys()
            .filter(|date| bars.binary_search_by_key(*date, |b| b.date).is_err())
            .copied()
            .collect();
        for date in orphans {
            tx.delete_derived(date).await?;
            derived.remove(&date);
            stats.orphans_removed += 1;
        }

        let symbol = tx.symbol().to_string();
        let mut previous_close: Option<f64> = None;
        for bar in &bars {
            let real_change = match (bar.close, previous_close) {
                (Some(close), Some(prev)) => Some(close - prev),
                _ => None,
            };
            if bar.close.is_some() {
                previous_close = bar.close;
            }

            match derived.get(&bar.date) {
                Some(row) if row.real_change == real_change => continue,
                Some(_) => stats.updated += 1,
                None => stats.inserted += 1,
            }
            tx.put_derived(&DerivedBar::new(symbol.clone(), bar.date, real_change))
                .await?;
        }

        debug!(
            kind = %tx.kind(),
            symbol = %symbol,
            rows = stats.rows,
            inserted = stats.inserted,
            updated = stats.updated,
            orphans = stats.orphans_removed,
            "衍生數據重建完成"
        );
        Ok(stats)
    }

    async fn real_change_at(
        tx: &mut dyn BarTransaction,
        date: NaiveDate,
        close: Option<f64>,
    ) -> StorageResult<Option<f64>> {
        let Some(close) = close else {
            return Ok(None);
        };
        let previous = tx.previous_priced_bar(date).await?;
        Ok(previous.and_then(|p| p.close).map(|prev| close - prev))
    }

    async fn recompute_successor(tx: &mut dyn BarTransaction, date: NaiveDate) -> StorageResult<()> {
        let Some(next) = tx.next_priced_bar(date).await? else {
            return Ok(());
        };
        if tx.get_derived(next.date).await?.is_none() {
            return Err(inconsistency(tx, next.date, "後繼原始數據沒有衍生數據"));
        }
        let real_change = Self::real_change_at(tx, next.date, next.close).await?;
        let symbol = tx.symbol().to_string();
        tx.put_derived(&DerivedBar::new(symbol, next.date, real_change))
            .await?;
        Ok(())
    }
}

fn inconsistency(tx: &dyn BarTransaction, date: NaiveDate, reason: &str) -> StorageError {
    error!(kind = %tx.kind(), symbol = tx.symbol(), %date, reason, "衍生數據不一致");
    StorageError::Inconsistency(format!("{} {} {}: {}", tx.kind(), tx.symbol(), date, reason))
}
