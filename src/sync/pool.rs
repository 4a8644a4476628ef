//! 有界工作者池：每個商品一個任務，同時最多 `workers` 個

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::sync::cancel::CancellationFlag;
use crate::sync::error::SyncError;
use crate::sync::report::SymbolOutcome;

/// 池執行的結果：每個已派發商品的結果，以及取消後未派發的商品
pub struct PoolResult {
    pub outcomes: BTreeMap<String, SymbolOutcome>,
    pub cancelled: Vec<String>,
}

/// 依序派發商品給工作者
///
/// 取消旗標設定後停止派發，已在執行的商品照常完成。
pub async fn run_symbols<F, Fut>(
    symbols: Vec<String>,
    workers: usize,
    cancel: &CancellationFlag,
    task: F,
) -> PoolResult
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = SymbolOutcome> + Send + 'static,
{
    let slots = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();
    let mut dispatched = BTreeSet::new();
    let mut cancelled = Vec::new();
    let mut pending = symbols.into_iter();

    while let Some(symbol) = pending.next() {
        if cancel.is_cancelled() {
            cancelled.push(symbol);
            break;
        }
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "工作者信號量已關閉");
                cancelled.push(symbol);
                break;
            }
        };
        // 等待空位期間可能已被取消
        if cancel.is_cancelled() {
            cancelled.push(symbol);
            break;
        }

        dispatched.insert(symbol.clone());
        let fut = task(symbol.clone());
        join_set.spawn(async move {
            let outcome = fut.await;
            drop(permit);
            (symbol, outcome)
        });
    }
    cancelled.extend(pending);
    if !cancelled.is_empty() {
        info!(count = cancelled.len(), "已取消，剩餘商品不再派發");
    }

    let mut outcomes = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((symbol, outcome)) => {
                outcomes.insert(symbol, outcome);
            }
            Err(e) => error!(error = %e, "同步任務異常結束"),
        }
    }
    // 異常結束的任務沒有結果
    for symbol in dispatched {
        outcomes.entry(symbol).or_insert_with(|| {
            SymbolOutcome::Failed(SyncError::Internal("同步任務異常結束".to_string()))
        });
    }

    PoolResult {
        outcomes,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_ceiling() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let symbols: Vec<String> = (0..10).map(|i| format!("S{i}")).collect();

        let result = run_symbols(symbols, 3, &CancellationFlag::new(), |_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                SymbolOutcome::Success(1)
            }
        })
        .await;

        assert_eq!(result.outcomes.len(), 10);
        assert!(result.cancelled.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let cancel = CancellationFlag::new();
        let symbols: Vec<String> = (0..5).map(|i| format!("S{i}")).collect();
        let trigger = cancel.clone();

        let result = run_symbols(symbols, 1, &cancel, move |symbol| {
            if symbol == "S1" {
                trigger.cancel();
            }
            async { SymbolOutcome::Success(0) }
        })
        .await;

        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.cancelled, vec!["S2", "S3", "S4"]);
    }
}
