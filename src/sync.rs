//! 日線同步引擎
//!
//! 調度器驅動每個商品的流程：節流取數、比對、在同一交易中寫入原始數據
//! 與衍生數據。熱度排名與商品資訊更新共用同一個節流器。

pub mod cancel;
pub mod derived;
pub mod error;
pub mod governor;
pub mod hot_rank;
pub mod instruments;
pub mod orchestrator;
pub mod pool;
pub mod reconciler;
pub mod report;

pub use cancel::CancellationFlag;
pub use derived::{DerivedMaintainer, RebuildStats};
pub use error::SyncError;
pub use governor::{FetchGovernor, Fetched, GovernorStats};
pub use hot_rank::HotRankSync;
pub use instruments::InstrumentRefresher;
pub use orchestrator::{RunMode, SyncOrchestrator, Universe, WindowPlan};
pub use reconciler::{reconcile, ReconcilePlan};
pub use report::{OutcomeCounts, SymbolOutcome, SyncReport};
