//! 同步流程調度
//!
//! 每個商品依執行模式計算要請求的日期區間，經節流器向上游取數，
//! 與已儲存的數據比對後，在單一交易中寫入原始數據並維護衍生數據。
//! 單一商品的失敗只記錄在報告中，不會中斷整次執行。

use chrono::{Days, NaiveDate};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::domain_types::{DailyBar, DateWindow, DomainError, InstrumentKind, TradingCalendar};
use crate::monitor::{MetricType, SyncMetrics};
use crate::source::{BarSource, SourceBatch};
use crate::storage::{BarTransaction, DailyBarStore, InstrumentRegistry, StorageError, StorageResult};
use crate::sync::cancel::CancellationFlag;
use crate::sync::derived::{DerivedMaintainer, RebuildStats};
use crate::sync::error::SyncError;
use crate::sync::governor::FetchGovernor;
use crate::sync::pool::run_symbols;
use crate::sync::reconciler::reconcile;
use crate::sync::report::{SymbolOutcome, SyncReport};
use crate::utils::today;

const CALENDAR_LABEL: &str = "trade_calendar";

/// 執行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// `[history_start, today]`
    FullDownload,
    /// 從最後儲存日期（減去回看天數）到今天
    IncrementalUpdate,
    /// 只補已儲存日期之間的缺口
    BackfillGaps,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::FullDownload => "full_download",
            RunMode::IncrementalUpdate => "incremental_update",
            RunMode::BackfillGaps => "backfill_gaps",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full" | "full_download" => Ok(RunMode::FullDownload),
            "incremental" | "incremental_update" => Ok(RunMode::IncrementalUpdate),
            "backfill" | "backfill_gaps" => Ok(RunMode::BackfillGaps),
            _ => Err(DomainError::UnknownMode(s.to_string())),
        }
    }
}

/// 一次執行的目標商品
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub kind: InstrumentKind,
    /// `None` 表示商品資訊表中該類別的全部商品
    pub symbols: Option<Vec<String>>,
}

impl Universe {
    pub fn all(kind: InstrumentKind) -> Self {
        Self { kind, symbols: None }
    }

    pub fn symbols<I, S>(kind: InstrumentKind, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            symbols: Some(symbols.into_iter().map(Into::into).collect()),
        }
    }
}

/// 一次上游請求的區間，補缺時只保留缺口內的日期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    pub window: DateWindow,
    pub only_dates: Option<BTreeSet<NaiveDate>>,
}

impl WindowPlan {
    fn whole(window: DateWindow) -> Self {
        Self {
            window,
            only_dates: None,
        }
    }

    fn accepts(&self, date: NaiveDate) -> bool {
        self.window.contains(date)
            && self
                .only_dates
                .as_ref()
                .map_or(true, |dates| dates.contains(&date))
    }

    fn clamp(self, clamp: Option<&DateWindow>) -> Option<Self> {
        let Some(clamp) = clamp else {
            return Some(self);
        };
        let window = self.window.intersect(clamp)?;
        Some(Self {
            window,
            only_dates: self.only_dates,
        })
    }
}

/// 全量下載區間
pub fn full_window(config: &SyncConfig, today: NaiveDate) -> Option<DateWindow> {
    DateWindow::new(config.history_start, today).ok()
}

/// 增量更新區間，從最後儲存日期往前回看 `lookback_days` 天
pub fn incremental_window(config: &SyncConfig, last: NaiveDate, today: NaiveDate) -> Option<DateWindow> {
    let start = last
        .checked_sub_days(Days::new(u64::from(config.lookback_days)))
        .unwrap_or(last);
    DateWindow::new(start, today).ok()
}

/// 已儲存日期之間的缺口
///
/// 沒有交易日的缺口（週末、休市假期）略過，相距不超過 `merge_days` 天的缺口
/// 合併為一次請求。
pub fn gap_windows(
    stored: &[NaiveDate],
    merge_days: u32,
    calendar: &TradingCalendar,
) -> Vec<WindowPlan> {
    let mut plans: Vec<WindowPlan> = Vec::new();

    for pair in stored.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let (Some(start), Some(end)) = (prev.succ_opt(), next.pred_opt()) else {
            continue;
        };
        let Ok(gap) = DateWindow::new(start, end) else {
            continue;
        };
        if !calendar.has_trading_day(&gap) {
            continue;
        }
        let dates: BTreeSet<NaiveDate> = gap.iter_days().collect();

        if let Some(last) = plans.last_mut() {
            if let Some(merged) = last.window.merge_if_close(&gap, u64::from(merge_days)) {
                last.window = merged;
                if let Some(only) = last.only_dates.as_mut() {
                    only.extend(dates);
                }
                continue;
            }
        }
        plans.push(WindowPlan {
            window: gap,
            only_dates: Some(dates),
        });
    }

    plans
}

/// 單一商品的處理流程，由工作者共享
struct SymbolPipeline {
    source: Arc<dyn BarSource>,
    store: Arc<dyn DailyBarStore>,
    governor: Arc<FetchGovernor>,
    config: SyncConfig,
    today: NaiveDate,
    calendar: TradingCalendar,
}

impl SymbolPipeline {
    async fn sync_symbol(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        mode: RunMode,
        clamp: Option<DateWindow>,
    ) -> SymbolOutcome {
        let started = Instant::now();

        let outcome = match self.plan_windows(kind, symbol, mode, clamp.as_ref()).await {
            Err(err) => SymbolOutcome::Failed(err),
            Ok(plans) => {
                debug!(kind = %kind, symbol, windows = plans.len(), "區間規劃完成");
                let mut rows = 0;
                let mut completed = 0;
                let mut failure = None;
                for plan in &plans {
                    match self.sync_window(kind, symbol, plan).await {
                        Ok(n) => {
                            rows += n;
                            completed += 1;
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                match failure {
                    None => SymbolOutcome::Success(rows),
                    Some(err) if completed > 0 => SymbolOutcome::PartialFailure(rows, err),
                    Some(err) => SymbolOutcome::Failed(err),
                }
            }
        };

        let elapsed = started.elapsed();
        SyncMetrics::record(kind.as_str(), MetricType::SymbolOutcome { outcome: outcome.label() });
        SyncMetrics::record(
            kind.as_str(),
            MetricType::RowsUpserted {
                count: outcome.rows_upserted(),
            },
        );
        SyncMetrics::record_symbol_duration(kind.as_str(), elapsed);

        match outcome.error() {
            None => info!(
                kind = %kind,
                symbol,
                rows_upserted = outcome.rows_upserted(),
                elapsed_ms = elapsed.as_millis() as u64,
                "商品同步成功"
            ),
            Some(err) => warn!(
                kind = %kind,
                symbol,
                outcome = outcome.label(),
                rows_upserted = outcome.rows_upserted(),
                error = %err,
                "商品同步失敗"
            ),
        }
        outcome
    }

    async fn plan_windows(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        mode: RunMode,
        clamp: Option<&DateWindow>,
    ) -> Result<Vec<WindowPlan>, SyncError> {
        let plans: Vec<WindowPlan> = match mode {
            RunMode::FullDownload => full_window(&self.config, self.today)
                .map(WindowPlan::whole)
                .into_iter()
                .collect(),
            RunMode::IncrementalUpdate => {
                let range = self
                    .store
                    .stored_range(kind, symbol)
                    .await
                    .map_err(|e| SyncError::from_storage(symbol, e))?;
                let window = match range {
                    Some((_, last)) => incremental_window(&self.config, last, self.today),
                    None => full_window(&self.config, self.today),
                };
                window.map(WindowPlan::whole).into_iter().collect()
            }
            RunMode::BackfillGaps => {
                let dates = self
                    .store
                    .stored_dates(kind, symbol)
                    .await
                    .map_err(|e| SyncError::from_storage(symbol, e))?;
                gap_windows(&dates, self.config.backfill_merge_days, &self.calendar)
            }
        };

        Ok(plans.into_iter().filter_map(|p| p.clamp(clamp)).collect())
    }

    async fn sync_window(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        plan: &WindowPlan,
    ) -> Result<usize, SyncError> {
        let window = plan.window;
        let fetched = self
            .governor
            .call(kind, symbol, Some(window), || {
                self.source.fetch_bars(kind, symbol, window)
            })
            .await?;

        let SourceBatch { mut bars, rejected } = fetched.value;
        if rejected > 0 {
            SyncMetrics::record(kind.as_str(), MetricType::RowsRejected { count: rejected });
            warn!(kind = %kind, symbol, %window, rejected, "上游數據有無效記錄被丟棄");
        }
        bars.retain(|b| plan.accepts(b.date));

        let mut conflicts = 0;
        loop {
            match self.apply(kind, symbol, window, bars.clone()).await {
                Ok(rows) => return Ok(rows),
                Err(StorageError::Conflict(message)) if conflicts == 0 => {
                    conflicts += 1;
                    warn!(kind = %kind, symbol, %window, error = %message, "寫入衝突，重試一次");
                }
                Err(err) => return Err(SyncError::from_storage(symbol, err)),
            }
        }
    }

    /// 在單一交易中比對並寫入，返回寫入的列數
    async fn apply(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: DateWindow,
        bars: Vec<DailyBar>,
    ) -> StorageResult<usize> {
        let mut tx = self.store.begin(kind, symbol).await?;
        match apply_plan(tx.as_mut(), window, bars).await {
            Ok(0) => {
                tx.rollback().await?;
                Ok(0)
            }
            Ok(rows) => {
                tx.commit().await?;
                Ok(rows)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(kind = %kind, symbol, error = %rollback_err, "交易回滾失敗");
                }
                Err(err)
            }
        }
    }
}

async fn apply_plan(
    tx: &mut dyn BarTransaction,
    window: DateWindow,
    bars: Vec<DailyBar>,
) -> StorageResult<usize> {
    let kind = tx.kind();
    let symbol = tx.symbol().to_string();
    let stored = tx.bars_in_window(window).await?;
    let plan = reconcile(kind, &symbol, bars, &stored);
    debug!(
        kind = %kind,
        symbol = %symbol,
        %window,
        upsert = plan.to_upsert.len(),
        unchanged = plan.unchanged_count,
        placeholders = plan.placeholder_count,
        duplicates = plan.duplicate_count,
        "比對完成"
    );

    for bar in &plan.to_upsert {
        DerivedMaintainer::apply_upsert(tx, bar).await?;
    }
    Ok(plan.to_upsert.len())
}

/// 同步調度器
pub struct SyncOrchestrator {
    source: Arc<dyn BarSource>,
    store: Arc<dyn DailyBarStore>,
    registry: Arc<dyn InstrumentRegistry>,
    governor: Arc<FetchGovernor>,
    config: SyncConfig,
    cancel: CancellationFlag,
    today: Option<NaiveDate>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn BarSource>,
        store: Arc<dyn DailyBarStore>,
        registry: Arc<dyn InstrumentRegistry>,
        governor: Arc<FetchGovernor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            governor,
            config,
            cancel: CancellationFlag::new(),
            today: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 固定「今天」的日期
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// 對一組商品執行同步
    pub async fn run(
        &self,
        mode: RunMode,
        universe: Universe,
        window: Option<DateWindow>,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let kind = universe.kind;
        let mut report = SyncReport::new(mode.as_str(), kind);

        let (symbols, unknown) = resolve_universe(self.registry.as_ref(), &universe).await?;
        for (symbol, err) in unknown {
            warn!(kind = %kind, symbol = %symbol, error = %err, "商品不在資訊表中");
            report.outcomes.insert(symbol, SymbolOutcome::Failed(err));
        }

        let workers = self.config.effective_workers();
        info!(
            mode = %mode,
            kind = %kind,
            symbols = symbols.len(),
            workers,
            window = ?window.map(|w| w.to_string()),
            "開始同步"
        );

        let calendar = match mode {
            RunMode::BackfillGaps if !symbols.is_empty() => self.load_calendar(kind).await,
            _ => TradingCalendar::weekdays(),
        };

        let pipeline = Arc::new(SymbolPipeline {
            source: self.source.clone(),
            store: self.store.clone(),
            governor: self.governor.clone(),
            config: self.config.clone(),
            today: self.today.unwrap_or_else(today),
            calendar,
        });

        let result = run_symbols(symbols, workers, &self.cancel, |symbol| {
            let pipeline = pipeline.clone();
            async move { pipeline.sync_symbol(kind, &symbol, mode, window).await }
        })
        .await;

        report.outcomes.extend(result.outcomes);
        report.cancelled = result.cancelled;
        report.elapsed = started.elapsed();
        SyncMetrics::record_run_duration(mode.as_str(), report.elapsed);
        report.log_summary();
        Ok(report)
    }

    /// 取得交易日曆，失敗時退回週一至週五
    async fn load_calendar(&self, kind: InstrumentKind) -> TradingCalendar {
        let fetched = self
            .governor
            .call(kind, CALENDAR_LABEL, None, || self.source.trade_calendar())
            .await;
        match fetched {
            Ok(fetched) if !fetched.value.is_empty() => {
                let calendar = TradingCalendar::from_days(fetched.value);
                debug!(days = calendar.len(), "交易日曆載入完成");
                calendar
            }
            Ok(_) => {
                warn!("上游交易日曆為空，改以週一至週五判斷交易日");
                TradingCalendar::weekdays()
            }
            Err(err) => {
                warn!(error = %err, "無法取得交易日曆，改以週一至週五判斷交易日");
                TradingCalendar::weekdays()
            }
        }
    }

    /// 刪除指定日期的日線，衍生數據在同一交易中維護
    pub async fn delete_bars(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        dates: &[NaiveDate],
    ) -> Result<usize, SyncError> {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();

        let mut conflicts = 0;
        loop {
            match self.delete_once(kind, symbol, &dates).await {
                Ok(deleted) => {
                    info!(kind = %kind, symbol, requested = dates.len(), deleted, "日線刪除完成");
                    return Ok(deleted);
                }
                Err(StorageError::Conflict(message)) if conflicts == 0 => {
                    conflicts += 1;
                    warn!(kind = %kind, symbol, error = %message, "刪除時寫入衝突，重試一次");
                }
                Err(err) => return Err(SyncError::from_storage(symbol, err)),
            }
        }
    }

    async fn delete_once(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        dates: &[NaiveDate],
    ) -> StorageResult<usize> {
        let mut tx = self.store.begin(kind, symbol).await?;
        let mut deleted = 0;
        for date in dates {
            match DerivedMaintainer::apply_delete(tx.as_mut(), *date).await {
                Ok(true) => deleted += 1,
                Ok(false) => debug!(kind = %kind, symbol, %date, "要刪除的日線不存在"),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(kind = %kind, symbol, error = %rollback_err, "交易回滾失敗");
                    }
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(deleted)
    }

    /// 重建一個商品的全部衍生數據
    pub async fn rebuild_derived(
        &self,
        kind: InstrumentKind,
        symbol: &str,
    ) -> Result<RebuildStats, SyncError> {
        let mut tx = self
            .store
            .begin(kind, symbol)
            .await
            .map_err(|e| SyncError::from_storage(symbol, e))?;
        let stats = match DerivedMaintainer::rebuild(tx.as_mut()).await {
            Ok(stats) => stats,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(kind = %kind, symbol, error = %rollback_err, "交易回滾失敗");
                }
                return Err(SyncError::from_storage(symbol, err));
            }
        };
        tx.commit()
            .await
            .map_err(|e| SyncError::from_storage(symbol, e))?;
        info!(
            kind = %kind,
            symbol,
            rows = stats.rows,
            inserted = stats.inserted,
            updated = stats.updated,
            orphans_removed = stats.orphans_removed,
            "衍生數據重建完成"
        );
        Ok(stats)
    }
}

/// 解析目標商品，返回要派發的商品與資訊表中找不到的商品
pub(crate) async fn resolve_universe(
    registry: &dyn InstrumentRegistry,
    universe: &Universe,
) -> Result<(Vec<String>, Vec<(String, SyncError)>), SyncError> {
    let kind = universe.kind;
    let Some(requested) = &universe.symbols else {
        let symbols = registry
            .list_instruments(kind)
            .await?
            .into_iter()
            .map(|inst| inst.symbol)
            .collect();
        return Ok((symbols, Vec::new()));
    };

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    let mut unknown = Vec::new();
    for symbol in requested {
        if !seen.insert(symbol.as_str()) {
            continue;
        }
        match registry.get_instrument(kind, symbol).await {
            Ok(Some(_)) => symbols.push(symbol.clone()),
            Ok(None) => unknown.push((
                symbol.clone(),
                SyncError::UnknownSymbol {
                    kind,
                    symbol: symbol.clone(),
                },
            )),
            Err(err) => unknown.push((symbol.clone(), SyncError::from_storage(symbol, err))),
        }
    }
    Ok((symbols, unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    #[rstest]
    #[case("full", RunMode::FullDownload)]
    #[case("incremental-update", RunMode::IncrementalUpdate)]
    #[case("BACKFILL_GAPS", RunMode::BackfillGaps)]
    fn test_parse_run_mode(#[case] input: &str, #[case] expected: RunMode) {
        assert_eq!(input.parse::<RunMode>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_run_mode() {
        assert!(matches!(
            "weekly".parse::<RunMode>(),
            Err(DomainError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_incremental_window_lookback() {
        let config = SyncConfig {
            lookback_days: 3,
            ..SyncConfig::default()
        };
        let window = incremental_window(&config, d(1, 10), d(1, 15)).unwrap();
        assert_eq!(window.start(), d(1, 7));
        assert_eq!(window.end(), d(1, 15));

        let config = SyncConfig::default();
        let window = incremental_window(&config, d(1, 10), d(1, 15)).unwrap();
        assert_eq!(window.start(), d(1, 10));

        // 最後儲存日期在今天之後時沒有區間
        assert!(incremental_window(&config, d(1, 20), d(1, 15)).is_none());
    }

    #[test]
    fn test_gap_windows_single_gap() {
        let plans = gap_windows(&[d(1, 1), d(1, 3)], 7, &TradingCalendar::weekdays());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].window, DateWindow::single(d(1, 2)));
        assert!(plans[0].accepts(d(1, 2)));
        assert!(!plans[0].accepts(d(1, 1)));
    }

    #[test]
    fn test_gap_windows_skip_weekends() {
        // 2024-01-05 週五，2024-01-08 週一
        let weekdays = TradingCalendar::weekdays();
        assert!(gap_windows(&[d(1, 5), d(1, 8)], 7, &weekdays).is_empty());
        assert!(gap_windows(&[d(1, 1), d(1, 2), d(1, 3)], 7, &weekdays).is_empty());
    }

    #[test]
    fn test_gap_windows_skip_holidays() {
        // 2024 春節：02-08 之後下一個交易日是 02-19
        let stored = [d(2, 8), d(2, 19)];
        assert_eq!(gap_windows(&stored, 7, &TradingCalendar::weekdays()).len(), 1);

        let calendar = TradingCalendar::from_days([d(2, 7), d(2, 8), d(2, 19), d(2, 20)]);
        assert!(gap_windows(&stored, 7, &calendar).is_empty());
    }

    #[test]
    fn test_gap_windows_merge() {
        let mut stored = vec![d(1, 1), d(1, 3), d(1, 4)];
        stored.extend((10..=31).map(|day| d(1, day)));
        stored.push(d(2, 5));

        let plans = gap_windows(&stored, 7, &TradingCalendar::weekdays());
        assert_eq!(plans.len(), 2);
        // 01-02 與 01-05..01-09 合併
        assert_eq!(plans[0].window, DateWindow::new(d(1, 2), d(1, 9)).unwrap());
        assert!(!plans[0].accepts(d(1, 3)));
        assert!(plans[0].accepts(d(1, 5)));
        assert_eq!(plans[1].window, DateWindow::new(d(2, 1), d(2, 4)).unwrap());

        let unmerged = gap_windows(&stored, 0, &TradingCalendar::weekdays());
        assert_eq!(unmerged.len(), 3);
    }

    #[test]
    fn test_plan_clamp() {
        let plan = WindowPlan::whole(DateWindow::new(d(1, 1), d(1, 31)).unwrap());
        let clamp = DateWindow::new(d(1, 10), d(2, 10)).unwrap();
        let clamped = plan.clone().clamp(Some(&clamp)).unwrap();
        assert_eq!(clamped.window, DateWindow::new(d(1, 10), d(1, 31)).unwrap());

        let outside = DateWindow::new(d(3, 1), d(3, 2)).unwrap();
        assert!(plan.clone().clamp(Some(&outside)).is_none());
        assert_eq!(plan.clone().clamp(None), Some(plan));
    }
}
