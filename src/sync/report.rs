use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain_types::InstrumentKind;
use crate::sync::error::SyncError;

/// 單一商品的同步結果
#[derive(Debug)]
pub enum SymbolOutcome {
    /// 全部區間成功，帶寫入的列數
    Success(usize),
    /// 部分區間已提交後失敗
    PartialFailure(usize, SyncError),
    Failed(SyncError),
}

impl SymbolOutcome {
    pub fn rows_upserted(&self) -> usize {
        match self {
            SymbolOutcome::Success(rows) | SymbolOutcome::PartialFailure(rows, _) => *rows,
            SymbolOutcome::Failed(_) => 0,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SymbolOutcome::Success(_) => None,
            SymbolOutcome::PartialFailure(_, err) | SymbolOutcome::Failed(err) => Some(err),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SymbolOutcome::Success(_) => "success",
            SymbolOutcome::PartialFailure(..) => "partial_failure",
            SymbolOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SymbolOutcome::Success(_))
    }
}

/// 結果計數
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub partial_failure: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// 一次同步執行的報告
#[derive(Debug)]
pub struct SyncReport {
    pub job: String,
    pub kind: InstrumentKind,
    pub outcomes: BTreeMap<String, SymbolOutcome>,
    /// 因取消而未派發的商品
    pub cancelled: Vec<String>,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn new(job: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            job: job.into(),
            kind,
            outcomes: BTreeMap::new(),
            cancelled: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.get(symbol)
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts {
            cancelled: self.cancelled.len(),
            ..Default::default()
        };
        for outcome in self.outcomes.values() {
            match outcome {
                SymbolOutcome::Success(_) => counts.success += 1,
                SymbolOutcome::PartialFailure(..) => counts.partial_failure += 1,
                SymbolOutcome::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    pub fn rows_upserted(&self) -> usize {
        self.outcomes.values().map(SymbolOutcome::rows_upserted).sum()
    }

    pub fn is_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }

    /// 輸出摘要日誌，失敗的商品逐一列出
    pub fn log_summary(&self) {
        let counts = self.counts();
        info!(
            job = %self.job,
            kind = %self.kind,
            success = counts.success,
            partial_failure = counts.partial_failure,
            failed = counts.failed,
            cancelled = counts.cancelled,
            rows_upserted = self.rows_upserted(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "同步完成"
        );
        for (symbol, outcome) in &self.outcomes {
            if let Some(err) = outcome.error() {
                warn!(
                    job = %self.job,
                    symbol = %symbol,
                    outcome = outcome.label(),
                    rows_upserted = outcome.rows_upserted(),
                    error = %err,
                    "商品同步未完成"
                );
            }
        }
    }
}
