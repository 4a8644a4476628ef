//! 比對上游數據與已儲存數據，決定需要寫入的列

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::domain_types::{DailyBar, InstrumentKind};

/// 比對結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// 需要插入或覆寫的列，依日期遞增
    pub to_upsert: Vec<DailyBar>,
    /// 與已儲存數據完全相同而略過的列
    pub unchanged_count: usize,
    /// `to_upsert` 中整列為空的佔位資料
    pub placeholder_count: usize,
    /// 同一批次中被後出現者取代的重複日期
    pub duplicate_count: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_upsert.is_empty()
    }
}

/// 比對一批上游數據與已儲存的數據
///
/// 上游數據會先依類別清除不存在的欄位，代碼統一為 `symbol`。
/// 同一日期重複出現時以後者為準。
pub fn reconcile(
    kind: InstrumentKind,
    symbol: &str,
    fetched: Vec<DailyBar>,
    stored: &[DailyBar],
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    let mut by_date: BTreeMap<NaiveDate, DailyBar> = BTreeMap::new();
    for bar in fetched {
        let mut bar = bar.normalized_for(kind);
        bar.symbol = symbol.to_string();
        if by_date.insert(bar.date, bar).is_some() {
            plan.duplicate_count += 1;
        }
    }

    let stored: HashMap<NaiveDate, &DailyBar> = stored.iter().map(|b| (b.date, b)).collect();

    for (date, bar) in by_date {
        match stored.get(&date) {
            Some(existing) if existing.same_values(&bar) => plan.unchanged_count += 1,
            _ => {
                if bar.is_placeholder() {
                    plan.placeholder_count += 1;
                }
                plan.to_upsert.push(bar);
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, close: f64) -> DailyBar {
        DailyBar::ohlcv("sz000001", day(d), close, close + 1.0, close - 1.0, close, 100)
    }

    #[test]
    fn test_new_rows_are_upserted_in_order() {
        let plan = reconcile(
            InstrumentKind::Stock,
            "sz000001",
            vec![bar(3, 12.0), bar(2, 11.0)],
            &[],
        );
        let dates: Vec<_> = plan.to_upsert.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![day(2), day(3)]);
        assert_eq!(plan.unchanged_count, 0);
    }

    #[test]
    fn test_identical_rows_are_skipped() {
        let stored = vec![bar(2, 11.0), bar(3, 12.0)];
        let plan = reconcile(
            InstrumentKind::Stock,
            "sz000001",
            vec![bar(2, 11.0), bar(3, 12.5)],
            &stored,
        );
        assert_eq!(plan.unchanged_count, 1);
        assert_eq!(plan.to_upsert.len(), 1);
        assert_eq!(plan.to_upsert[0].close, Some(12.5));
    }

    #[test]
    fn test_later_duplicate_wins() {
        let plan = reconcile(
            InstrumentKind::Stock,
            "sz000001",
            vec![bar(2, 11.0), bar(2, 11.5)],
            &[],
        );
        assert_eq!(plan.duplicate_count, 1);
        assert_eq!(plan.to_upsert.len(), 1);
        assert_eq!(plan.to_upsert[0].close, Some(11.5));
    }

    #[test]
    fn test_placeholders_are_counted() {
        let plan = reconcile(
            InstrumentKind::Index,
            "000300",
            vec![DailyBar::empty("000300", day(4)), bar(5, 3000.0)],
            &[],
        );
        assert_eq!(plan.placeholder_count, 1);
        assert_eq!(plan.to_upsert.len(), 2);

        // 已儲存的佔位資料再次出現時不重寫
        let stored = vec![DailyBar::empty("000300", day(4))];
        let plan = reconcile(
            InstrumentKind::Index,
            "000300",
            vec![DailyBar::empty("000300", day(4))],
            &stored,
        );
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged_count, 1);
    }

    #[test]
    fn test_fields_outside_kind_are_ignored() {
        let stored = vec![bar(2, 11.0)];
        let fetched = DailyBar {
            amplitude: Some(3.2),
            ..bar(2, 11.0)
        };
        let plan = reconcile(InstrumentKind::Stock, "sz000001", vec![fetched], &stored);
        assert!(plan.is_empty());
    }

    fn arb_bar() -> impl Strategy<Value = DailyBar> {
        (
            1u32..=28,
            proptest::option::of(1.0f64..100.0),
            proptest::option::of(0i64..1_000_000),
        )
            .prop_map(|(d, close, volume)| DailyBar {
                close,
                volume,
                ..DailyBar::empty("sz000001", day(d))
            })
    }

    proptest! {
        #[test]
        fn prop_applying_plan_makes_it_idempotent(
            stored in proptest::collection::vec(arb_bar(), 0..20),
            fetched in proptest::collection::vec(arb_bar(), 0..20),
        ) {
            let mut table: BTreeMap<NaiveDate, DailyBar> =
                stored.into_iter().map(|b| (b.date, b)).collect();
            let current: Vec<DailyBar> = table.values().cloned().collect();

            let plan = reconcile(InstrumentKind::Stock, "sz000001", fetched.clone(), &current);
            for bar in plan.to_upsert {
                table.insert(bar.date, bar);
            }

            let current: Vec<DailyBar> = table.values().cloned().collect();
            let again = reconcile(InstrumentKind::Stock, "sz000001", fetched, &current);
            prop_assert!(again.to_upsert.is_empty());
        }
    }
}
