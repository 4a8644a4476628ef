use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use stock_sync::config::{self, ApplicationConfig};
use stock_sync::domain_types::{DateWindow, InstrumentKind};
use stock_sync::monitor::{init_logging, install_prometheus};
use stock_sync::source::{BarSource, HttpBarSource};
use stock_sync::storage::{
    get_db_pool, run_migrations, DailyBarStore, HotRankStore, InMemoryMarketStore,
    InstrumentRegistry, PgDailyBarStore, PgHotRankStore, PgInstrumentRegistry,
};
use stock_sync::sync::{
    CancellationFlag, FetchGovernor, HotRankSync, InstrumentRefresher, RunMode, SyncOrchestrator,
    SyncReport, Universe,
};
use stock_sync::utils::parse_flexible_date;

#[derive(Parser)]
#[command(name = "stock_sync", about = "股票、指數與 ETF 日線數據同步工具")]
struct Cli {
    /// 只寫入記憶體，不修改資料庫
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 同步日線數據
    Sync {
        /// 商品類別 (stock、index 或 etf)
        #[arg(short, long)]
        kind: InstrumentKind,

        /// 執行模式 (full、incremental 或 backfill)
        #[arg(short, long, default_value = "incremental")]
        mode: RunMode,

        /// 指定商品代碼，以逗號分隔，預設為資訊表中的全部商品
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// 限制區間的起始日期
        #[arg(long)]
        start: Option<String>,

        /// 限制區間的結束日期
        #[arg(long)]
        end: Option<String>,
    },

    /// 同步個股熱度排名
    HotRank {
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// 最多處理的股票數
        #[arg(long)]
        limit: Option<usize>,
    },

    /// 更新商品資訊表，未指定類別時更新全部
    RefreshInstruments {
        #[arg(short, long)]
        kind: Option<InstrumentKind>,
    },

    /// 重建衍生數據
    RebuildDerived {
        #[arg(short, long)]
        kind: InstrumentKind,

        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
    },

    /// 刪除指定日期的日線
    Delete {
        #[arg(short, long)]
        kind: InstrumentKind,

        #[arg(short, long)]
        symbol: String,

        #[arg(required = true)]
        dates: Vec<String>,
    },
}

/// 同步流程使用的儲存後端
struct Backends {
    bars: Arc<dyn DailyBarStore>,
    registry: Arc<dyn InstrumentRegistry>,
    hot_ranks: Arc<dyn HotRankStore>,
}

async fn build_backends(app_config: &ApplicationConfig, dry_run: bool) -> Result<Backends> {
    if dry_run {
        warn!("dry-run 模式：所有寫入只保存在記憶體中");
        let store = InMemoryMarketStore::new();
        return Ok(Backends {
            bars: Arc::new(store.clone()),
            registry: Arc::new(store.clone()),
            hot_ranks: Arc::new(store),
        });
    }

    // 獲取全局資料庫連線池
    let pool = get_db_pool(&app_config.database)
        .await
        .context("無法初始化資料庫連接池")?;
    run_migrations(pool).await.context("資料庫遷移執行失敗")?;

    Ok(Backends {
        bars: Arc::new(PgDailyBarStore::new(pool.clone())),
        registry: Arc::new(PgInstrumentRegistry::new(pool.clone())),
        hot_ranks: Arc::new(PgHotRankStore::new(pool.clone())),
    })
}

fn parse_window(start: Option<&str>, end: Option<&str>) -> Result<Option<DateWindow>> {
    let parse = |value: Option<&str>| -> Result<Option<NaiveDate>> {
        value
            .map(parse_flexible_date)
            .transpose()
            .context("無法解析日期參數")
    };
    let window = match (parse(start)?, parse(end)?) {
        (None, None) => None,
        (start, end) => Some(DateWindow::new(
            start.unwrap_or(NaiveDate::MIN),
            end.unwrap_or(NaiveDate::MAX),
        )?),
    };
    Ok(window)
}

fn universe(kind: InstrumentKind, symbols: Vec<String>) -> Universe {
    if symbols.is_empty() {
        Universe::all(kind)
    } else {
        Universe::symbols(kind, symbols)
    }
}

fn exit_code(report: &SyncReport) -> ExitCode {
    let counts = report.counts();
    if counts.failed > 0 || counts.partial_failure > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 初始化配置
    let app_config = config::init_config().context("無法載入配置")?;

    // 初始化日誌系統，guard 必須存活到程式結束
    let _log_guard = init_logging(&app_config.log).context("設置日誌系統失敗")?;

    if let Some(listen) = &app_config.monitor.prometheus_listen {
        install_prometheus(listen).context("無法啟動 Prometheus 指標輸出")?;
        info!(listen = %listen, "Prometheus 指標輸出已啟動");
    }

    let backends = build_backends(app_config, cli.dry_run).await?;
    let source: Arc<dyn BarSource> =
        Arc::new(HttpBarSource::new(&app_config.source).context("無法建立數據源客戶端")?);
    let governor = Arc::new(FetchGovernor::new(app_config.governor.clone()));

    // 收到 Ctrl-C 後不再派發新的商品
    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("接收到中斷信號，等待進行中的商品完成...");
                cancel.cancel();
            }
        });
    }

    let refresher = InstrumentRefresher::new(source.clone(), backends.registry.clone(), governor.clone());

    let code = match cli.command {
        Commands::Sync {
            kind,
            mode,
            symbols,
            start,
            end,
        } => {
            let window = parse_window(start.as_deref(), end.as_deref())?;
            if cli.dry_run {
                refresher.refresh(kind).await.context("無法取得商品清單")?;
            }
            let orchestrator = SyncOrchestrator::new(
                source.clone(),
                backends.bars.clone(),
                backends.registry.clone(),
                governor.clone(),
                app_config.sync.clone(),
            )
            .with_cancellation(cancel.clone());
            let report = orchestrator
                .run(mode, universe(kind, symbols), window)
                .await
                .context("日線同步失敗")?;
            exit_code(&report)
        }
        Commands::HotRank { symbols, limit } => {
            if cli.dry_run {
                refresher
                    .refresh(InstrumentKind::Stock)
                    .await
                    .context("無法取得股票清單")?;
            }
            let mut job = HotRankSync::new(
                source.clone(),
                backends.hot_ranks.clone(),
                backends.registry.clone(),
                governor.clone(),
                app_config.sync.effective_workers(),
            )
            .with_cancellation(cancel.clone());
            if let Some(limit) = limit {
                job = job.with_max_symbols(limit);
            }
            let report = job
                .run(universe(InstrumentKind::Stock, symbols))
                .await
                .context("熱度排名同步失敗")?;
            exit_code(&report)
        }
        Commands::RefreshInstruments { kind } => {
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => InstrumentKind::ALL.to_vec(),
            };
            for kind in kinds {
                let count = refresher
                    .refresh(kind)
                    .await
                    .with_context(|| format!("{} 商品資訊更新失敗", kind))?;
                info!(kind = %kind, count, "商品資訊已更新");
            }
            ExitCode::SUCCESS
        }
        Commands::RebuildDerived { kind, symbols } => {
            let orchestrator = SyncOrchestrator::new(
                source.clone(),
                backends.bars.clone(),
                backends.registry.clone(),
                governor.clone(),
                app_config.sync.clone(),
            );
            for symbol in symbols {
                orchestrator
                    .rebuild_derived(kind, &symbol)
                    .await
                    .with_context(|| format!("{} 衍生數據重建失敗", symbol))?;
            }
            ExitCode::SUCCESS
        }
        Commands::Delete { kind, symbol, dates } => {
            let dates = dates
                .iter()
                .map(|d| parse_flexible_date(d))
                .collect::<Result<Vec<_>, _>>()
                .context("無法解析日期參數")?;
            let orchestrator = SyncOrchestrator::new(
                source.clone(),
                backends.bars.clone(),
                backends.registry.clone(),
                governor.clone(),
                app_config.sync.clone(),
            );
            let deleted = orchestrator
                .delete_bars(kind, &symbol, &dates)
                .await
                .with_context(|| format!("{} 日線刪除失敗", symbol))?;
            info!(kind = %kind, symbol = %symbol, deleted, "刪除完成");
            ExitCode::SUCCESS
        }
    };

    let stats = governor.stats();
    info!(
        requests = stats.requests,
        retries = stats.retries,
        rate_limited = stats.rate_limited,
        failures = stats.failures,
        "上游請求統計"
    );
    Ok(code)
}
