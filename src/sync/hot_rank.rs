//! 個股熱度排名同步
//!
//! 與日線同步共用工作者池與節流器，但沒有衍生數據，直接以
//! (代碼, 日期) 插入或更新。

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::domain_types::{HotRank, InstrumentKind};
use crate::monitor::{MetricType, SyncMetrics};
use crate::source::BarSource;
use crate::storage::{HotRankStore, InstrumentRegistry, StorageError};
use crate::sync::cancel::CancellationFlag;
use crate::sync::error::SyncError;
use crate::sync::governor::FetchGovernor;
use crate::sync::orchestrator::{resolve_universe, Universe};
use crate::sync::pool::run_symbols;
use crate::sync::report::{SymbolOutcome, SyncReport};

const JOB: &str = "hot_rank";

pub struct HotRankSync {
    source: Arc<dyn BarSource>,
    store: Arc<dyn HotRankStore>,
    registry: Arc<dyn InstrumentRegistry>,
    governor: Arc<FetchGovernor>,
    workers: usize,
    cancel: CancellationFlag,
    max_symbols: Option<usize>,
}

impl HotRankSync {
    pub fn new(
        source: Arc<dyn BarSource>,
        store: Arc<dyn HotRankStore>,
        registry: Arc<dyn InstrumentRegistry>,
        governor: Arc<FetchGovernor>,
        workers: usize,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            governor,
            workers,
            cancel: CancellationFlag::new(),
            max_symbols: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 只處理前 `limit` 個商品
    pub fn with_max_symbols(mut self, limit: usize) -> Self {
        self.max_symbols = Some(limit);
        self
    }

    pub async fn run(&self, universe: Universe) -> Result<SyncReport, SyncError> {
        if universe.kind != InstrumentKind::Stock {
            return Err(SyncError::InvalidRequest(format!(
                "熱度排名只支援股票，收到 {}",
                universe.kind
            )));
        }
        let started = Instant::now();
        let mut report = SyncReport::new(JOB, universe.kind);

        let (mut symbols, unknown) = resolve_universe(self.registry.as_ref(), &universe).await?;
        for (symbol, err) in unknown {
            warn!(symbol = %symbol, error = %err, "商品不在資訊表中");
            report.outcomes.insert(symbol, SymbolOutcome::Failed(err));
        }
        if let Some(limit) = self.max_symbols {
            symbols.truncate(limit);
        }
        info!(job = JOB, symbols = symbols.len(), workers = self.workers, "開始同步熱度排名");

        let result = run_symbols(symbols, self.workers, &self.cancel, |symbol| {
            let source = self.source.clone();
            let store = self.store.clone();
            let governor = self.governor.clone();
            async move { sync_one(source.as_ref(), store.as_ref(), &governor, &symbol).await }
        })
        .await;

        report.outcomes.extend(result.outcomes);
        report.cancelled = result.cancelled;
        report.elapsed = started.elapsed();
        SyncMetrics::record_run_duration(JOB, report.elapsed);
        report.log_summary();
        Ok(report)
    }
}

async fn sync_one(
    source: &dyn BarSource,
    store: &dyn HotRankStore,
    governor: &FetchGovernor,
    symbol: &str,
) -> SymbolOutcome {
    let kind = InstrumentKind::Stock;
    let fetched = governor
        .call(kind, symbol, None, || source.fetch_hot_rank(symbol))
        .await;

    let outcome = match fetched {
        Err(err) => SymbolOutcome::Failed(err),
        Ok(fetched) => match upsert_with_retry(store, symbol, &fetched.value).await {
            Ok(rows) => SymbolOutcome::Success(rows),
            Err(err) => SymbolOutcome::Failed(err),
        },
    };

    SyncMetrics::record(JOB, MetricType::SymbolOutcome { outcome: outcome.label() });
    match outcome.error() {
        None => info!(job = JOB, symbol, rows_upserted = outcome.rows_upserted(), "熱度排名同步成功"),
        Some(err) => warn!(job = JOB, symbol, error = %err, "熱度排名同步失敗"),
    }
    outcome
}

/// 寫入衝突時重試一次
async fn upsert_with_retry(
    store: &dyn HotRankStore,
    symbol: &str,
    ranks: &[HotRank],
) -> Result<usize, SyncError> {
    let mut conflicts = 0;
    loop {
        match store.upsert_hot_ranks(ranks).await {
            Ok(rows) => return Ok(rows),
            Err(StorageError::Conflict(message)) if conflicts == 0 => {
                conflicts += 1;
                warn!(job = JOB, symbol, error = %message, "熱度排名寫入衝突，重試一次");
            }
            Err(err) => return Err(SyncError::from_storage(symbol, err)),
        }
    }
}
