//! 商品資訊表更新

use std::sync::Arc;
use tracing::info;

use crate::domain_types::InstrumentKind;
use crate::source::BarSource;
use crate::storage::InstrumentRegistry;
use crate::sync::error::SyncError;
use crate::sync::governor::FetchGovernor;

/// 從上游的商品清單更新 `stock_info` / `index_info` / `etf_info`
pub struct InstrumentRefresher {
    source: Arc<dyn BarSource>,
    registry: Arc<dyn InstrumentRegistry>,
    governor: Arc<FetchGovernor>,
}

impl InstrumentRefresher {
    pub fn new(
        source: Arc<dyn BarSource>,
        registry: Arc<dyn InstrumentRegistry>,
        governor: Arc<FetchGovernor>,
    ) -> Self {
        Self {
            source,
            registry,
            governor,
        }
    }

    /// 返回插入或更新的商品數
    pub async fn refresh(&self, kind: InstrumentKind) -> Result<usize, SyncError> {
        let label = format!("{}_list", kind);
        let fetched = self
            .governor
            .call(kind, &label, None, || self.source.list_instruments(kind))
            .await?;

        let instruments: Vec<_> = fetched
            .value
            .into_iter()
            .filter(|inst| inst.kind == kind && !inst.symbol.is_empty())
            .collect();
        let count = self
            .registry
            .upsert_instruments(&instruments)
            .await
            .map_err(|e| SyncError::from_storage(&label, e))?;

        info!(kind = %kind, count, attempts = fetched.attempts, "商品資訊更新完成");
        Ok(count)
    }
}
