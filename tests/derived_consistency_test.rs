mod common;

use assert_matches::assert_matches;
use std::sync::Arc;

use common::*;
use stock_sync::domain_types::{DailyBar, DerivedBar, InstrumentKind};
use stock_sync::storage::InMemoryMarketStore;
use stock_sync::sync::{RebuildStats, RunMode, SymbolOutcome, SyncError, Universe};

const SYM: &str = "SYM";
const STOCK: InstrumentKind = InstrumentKind::Stock;

/// 01-09 到 01-12 的四筆日線
fn seed_series() -> Vec<DailyBar> {
    vec![
        bar(SYM, day(1, 9), 9.0),
        bar(SYM, day(1, 10), 10.0),
        bar(SYM, day(1, 11), 11.0),
        bar(SYM, day(1, 12), 11.5),
    ]
}

async fn synced_store(source: &Arc<ScriptedSource>) -> InMemoryMarketStore {
    let store = InMemoryMarketStore::new();
    register(&store, STOCK, &[SYM]).await;
    source.set_bars(SYM, seed_series());
    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 12),
    );
    let report = orchestrator
        .run(RunMode::FullDownload, Universe::all(STOCK), None)
        .await
        .unwrap();
    assert_eq!(report.rows_upserted(), 4);
    store
}

#[tokio::test]
async fn test_close_update_cascades_to_successor() {
    let source = Arc::new(ScriptedSource::new());
    let store = synced_store(&source).await;

    let mut bars = seed_series();
    bars[1] = bars[1].clone().with_close(Some(10.4));
    source.set_bars(SYM, bars);

    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 12),
    );
    let report = orchestrator
        .run(RunMode::FullDownload, Universe::all(STOCK), None)
        .await
        .unwrap();
    assert_matches!(report.outcome(SYM), Some(SymbolOutcome::Success(1)));

    let snapshot = store.snapshot(STOCK, SYM).await;
    let change = |d| snapshot.derived[&day(1, d)].real_change.unwrap();
    assert!((change(10) - 1.4).abs() < 1e-9);
    assert!((change(11) - 0.6).abs() < 1e-9);
    assert!((change(12) - 0.5).abs() < 1e-9);
    assert_derived_consistent(&store, STOCK, SYM).await;
}

#[tokio::test]
async fn test_delete_cascade_updates_successor() {
    let source = Arc::new(ScriptedSource::new());
    let store = synced_store(&source).await;
    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 12),
    );

    let deleted = orchestrator
        .delete_bars(STOCK, SYM, &[day(1, 10), day(1, 20)])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let snapshot = store.snapshot(STOCK, SYM).await;
    assert!(!snapshot.bars.contains_key(&day(1, 10)));
    assert!(!snapshot.derived.contains_key(&day(1, 10)));
    assert_eq!(snapshot.derived[&day(1, 11)].real_change, Some(2.0));
    assert_derived_consistent(&store, STOCK, SYM).await;
}

#[tokio::test]
async fn test_deleting_placeholder_leaves_successor_untouched() {
    let source = Arc::new(ScriptedSource::new());
    let store = InMemoryMarketStore::new();
    register(&store, STOCK, &[SYM]).await;
    source.set_bars(
        SYM,
        vec![
            bar(SYM, day(1, 9), 9.0),
            DailyBar::empty(SYM, day(1, 10)),
            bar(SYM, day(1, 11), 11.0),
        ],
    );
    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 11),
    );
    orchestrator
        .run(RunMode::FullDownload, Universe::all(STOCK), None)
        .await
        .unwrap();

    orchestrator.delete_bars(STOCK, SYM, &[day(1, 10)]).await.unwrap();

    let snapshot = store.snapshot(STOCK, SYM).await;
    assert_eq!(snapshot.bars.len(), 2);
    assert_eq!(snapshot.derived[&day(1, 11)].real_change, Some(2.0));
    assert_derived_consistent(&store, STOCK, SYM).await;
}

#[tokio::test]
async fn test_inconsistent_state_fails_symbol_and_rolls_back() {
    let source = Arc::new(ScriptedSource::new());
    let store = synced_store(&source).await;
    store.remove_derived(STOCK, SYM, day(1, 11)).await;

    let mut bars = seed_series();
    bars[1] = bars[1].clone().with_close(Some(10.2));
    source.set_bars(SYM, bars);

    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 12),
    );
    let report = orchestrator
        .run(RunMode::FullDownload, Universe::all(STOCK), None)
        .await
        .unwrap();

    assert_matches!(
        report.outcome(SYM),
        Some(SymbolOutcome::Failed(SyncError::DerivedInconsistency { .. }))
    );
    let snapshot = store.snapshot(STOCK, SYM).await;
    assert_eq!(snapshot.bars[&day(1, 10)].close, Some(10.0));
}

#[tokio::test]
async fn test_rebuild_repairs_inconsistent_symbol() {
    let source = Arc::new(ScriptedSource::new());
    let store = synced_store(&source).await;
    store.remove_derived(STOCK, SYM, day(1, 11)).await;
    store
        .seed_derived(STOCK, &[DerivedBar::new(SYM, day(1, 12), Some(42.0))])
        .await;

    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 12),
    );
    let stats = orchestrator.rebuild_derived(STOCK, SYM).await.unwrap();
    assert_eq!(
        stats,
        RebuildStats {
            rows: 4,
            inserted: 1,
            updated: 1,
            orphans_removed: 0,
        }
    );
    assert_derived_consistent(&store, STOCK, SYM).await;

    // 修復後可以正常同步
    let report = orchestrator
        .run(RunMode::FullDownload, Universe::all(STOCK), None)
        .await
        .unwrap();
    assert_matches!(report.outcome(SYM), Some(SymbolOutcome::Success(0)));
}

#[tokio::test]
async fn test_delete_of_row_without_derived_is_rejected() {
    let source = Arc::new(ScriptedSource::new());
    let store = synced_store(&source).await;
    store.remove_derived(STOCK, SYM, day(1, 10)).await;

    let (orchestrator, _) = build_orchestrator(
        source.clone(),
        &store,
        fast_governor(),
        test_sync_config(),
        day(1, 12),
    );
    let result = orchestrator.delete_bars(STOCK, SYM, &[day(1, 10)]).await;
    assert_matches!(result, Err(SyncError::DerivedInconsistency { .. }));
    assert!(store.snapshot(STOCK, SYM).await.bars.contains_key(&day(1, 10)));
}
