//! 上游請求節流與重試
//!
//! 所有對 `BarSource` 的呼叫都經過 `FetchGovernor`：
//! 全域信號量限制同時進行中的請求數，共享的間隔閘門保證兩次請求開始之間
//! 至少相隔 `min_request_interval`，失敗時依錯誤類型決定是否退避重試。
//! 任何一個請求被限流時，閘門整體順延到冷卻結束，所有工作者一起等待。

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GovernorConfig;
use crate::domain_types::{DateWindow, InstrumentKind};
use crate::monitor::{MetricType, SyncMetrics};
use crate::source::SourceError;
use crate::sync::error::SyncError;

/// 成功的呼叫結果與實際嘗試次數
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
}

/// 節流器統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GovernorStats {
    pub requests: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub failures: u64,
}

/// 請求節流器，由所有工作者共享
pub struct FetchGovernor {
    config: GovernorConfig,
    permits: Semaphore,
    next_start: Mutex<Option<Instant>>,
    requests: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    failures: AtomicU64,
}

impl FetchGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let permits = Semaphore::new(config.max_in_flight.max(1));
        Self {
            config,
            permits,
            next_start: Mutex::new(None),
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// 執行一次上游呼叫，必要時退避重試
    ///
    /// `op` 每次嘗試都會被重新呼叫。重試用盡或遇到不可重試的錯誤時返回
    /// `SyncError::FetchFailed`，其中帶有最後一次的錯誤原因。
    pub async fn call<T, F, Fut>(
        &self,
        kind: InstrumentKind,
        symbol: &str,
        window: Option<DateWindow>,
        mut op: F,
    ) -> Result<Fetched<T>, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            // 許可只在請求期間持有，退避等待時釋放
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| SyncError::Internal(format!("節流信號量已關閉: {}", e)))?;
                self.wait_for_slot().await;
                self.requests.fetch_add(1, Ordering::Relaxed);
                op().await
            };

            let cause = match result {
                Ok(value) => {
                    SyncMetrics::record(kind.as_str(), MetricType::Request { outcome: "ok" });
                    debug!(kind = %kind, symbol, attempt, "上游請求成功");
                    return Ok(Fetched {
                        value,
                        attempts: attempt,
                    });
                }
                Err(cause) => cause,
            };

            SyncMetrics::record(kind.as_str(), MetricType::Request { outcome: cause.label() });
            if let SourceError::RateLimited { retry_after } = &cause {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
                let wait = self.config.rate_limit_wait(*retry_after);
                self.hold_gate_until(Instant::now() + wait).await;
            }

            let delay = match self.retry_delay(&cause, attempt) {
                Some(delay) if attempt <= self.config.max_retries => delay,
                _ => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        kind = %kind,
                        symbol,
                        attempts = attempt,
                        reason = cause.label(),
                        error = %cause,
                        "上游請求失敗，不再重試"
                    );
                    return Err(SyncError::FetchFailed {
                        symbol: symbol.to_string(),
                        window,
                        attempts: attempt,
                        cause,
                    });
                }
            };

            self.retries.fetch_add(1, Ordering::Relaxed);
            SyncMetrics::record(kind.as_str(), MetricType::Retry { reason: cause.label() });
            SyncMetrics::record_backoff(delay);
            warn!(
                kind = %kind,
                symbol,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = cause.label(),
                error = %cause,
                "上游請求失敗，退避後重試"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// 下一次重試前的等待時間，`None` 表示不重試
    fn retry_delay(&self, cause: &SourceError, attempt: u32) -> Option<Duration> {
        match cause {
            SourceError::Unavailable(_) => {
                let interval = backoff_interval(&self.config, attempt);
                Some(interval + jitter(interval, self.config.jitter_ratio))
            }
            SourceError::RateLimited { retry_after } => Some(self.config.rate_limit_wait(*retry_after)),
            SourceError::DataInvalid(_) => None,
        }
    }

    /// 等待到允許的下一次請求開始時間
    async fn wait_for_slot(&self) {
        let interval = self.config.min_request_interval();
        let mut next_start = self.next_start.lock().await;
        let now = Instant::now();
        let start = match *next_start {
            Some(at) if at > now => {
                tokio::time::sleep_until(at).await;
                at
            }
            _ => now,
        };
        *next_start = Some(start + interval);
    }

    /// 把閘門順延到 `until`，已經更晚時不變
    async fn hold_gate_until(&self, until: Instant) {
        let mut next_start = self.next_start.lock().await;
        if next_start.map_or(true, |at| at < until) {
            *next_start = Some(until);
        }
    }
}

/// 第 `attempt` 次失敗後的退避間隔（不含抖動）：`base * 2^(attempt-1)`，上限 `max_delay`
pub fn backoff_interval(config: &GovernorConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    config
        .base_delay()
        .saturating_mul(factor)
        .min(config.max_delay())
}

fn jitter(delay: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 || delay.is_zero() {
        return Duration::ZERO;
    }
    let upper = delay.as_secs_f64() * ratio;
    Duration::from_secs_f64(rand::rng().random_range(0.0..=upper))
}
